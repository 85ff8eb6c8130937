//! Event Window Reader.
//!
//! Streams raw events for a half-open window in fixed-size pages so a
//! month-long window never materializes in memory at once, and resolves
//! the user trust fields and video metadata the scorers need.

use crate::{
    error::CoreResult,
    store::{CoreStore, EventRow, UserRow, VideoRow},
    types::{UserId, VideoId, Window},
};
use std::collections::HashMap;

/// Keyset-paged reader over `event` rows ordered by `(video_id, ts)`.
pub struct EventWindowReader<'a> {
    store:        &'a CoreStore,
    window:       Window,
    video_filter: Option<VideoId>,
    batch_size:   usize,
    cursor:       Option<(VideoId, i64, i64)>,
    exhausted:    bool,
}

impl<'a> EventWindowReader<'a> {
    pub fn new(
        store: &'a CoreStore,
        window: Window,
        video_filter: Option<VideoId>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            window,
            video_filter,
            batch_size,
            cursor: None,
            exhausted: false,
        }
    }

    /// Fetch the next page, or `None` once the window is drained.
    pub fn next_batch(&mut self) -> CoreResult<Option<Vec<EventRow>>> {
        if self.exhausted {
            return Ok(None);
        }
        let page = self.store.events_page(
            self.window,
            self.video_filter,
            self.cursor,
            self.batch_size,
        )?;
        if page.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }
        if page.len() < self.batch_size {
            self.exhausted = true;
        }
        let last = page.last().expect("non-empty page");
        self.cursor = Some((last.video_id, last.ts, last.event_id));
        Ok(Some(page))
    }

    /// Drain every page into one vector. Appropriate for single-video
    /// windows; multi-video callers should page.
    pub fn read_all(mut self) -> CoreResult<Vec<EventRow>> {
        let mut out = Vec::new();
        while let Some(page) = self.next_batch()? {
            out.extend(page);
        }
        Ok(out)
    }
}

/// Events for one video's window together with the resolved user and
/// video rows the scoring pipeline reads.
pub struct ResolvedVideoWindow {
    pub video:  VideoRow,
    pub events: Vec<EventRow>,
    pub users:  HashMap<UserId, UserRow>,
}

/// Read one video's window and resolve every participating user.
/// The video row is read alongside the events; reproducibility requires
/// callers to treat this read as the snapshot for the whole computation.
pub fn read_video_window(
    store: &CoreStore,
    video_id: VideoId,
    window: Window,
    batch_size: usize,
) -> CoreResult<Option<ResolvedVideoWindow>> {
    let Some(video) = store.video(video_id)? else {
        return Ok(None);
    };
    let events =
        EventWindowReader::new(store, window, Some(video_id), batch_size).read_all()?;

    let mut user_ids: Vec<UserId> = events.iter().map(|e| e.user_id).collect();
    user_ids.sort_unstable();
    user_ids.dedup();
    let users = store.users_by_ids(&user_ids)?;

    Ok(Some(ResolvedVideoWindow { video, events, users }))
}
