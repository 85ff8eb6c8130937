//! Per-video window analysis: read → extract → score → persist.
//!
//! `analyze_window` is both an operator surface and the on-demand path
//! the unit builder takes when a day window has no aggregate yet. Runs
//! for different videos are independent and may execute concurrently
//! against separate store connections.

use crate::{
    config::CoreParams,
    error::{CoreError, CoreResult},
    features,
    scoring::{self, EisDetails},
    store::{AggregateRow, CoreStore},
    trust::TrustResolver,
    types::{VideoId, Window},
    window_reader,
};
use chrono::Utc;

pub fn analyze_window(
    store: &CoreStore,
    params: &CoreParams,
    video_id: VideoId,
    window: Window,
) -> CoreResult<EisDetails> {
    if window.start >= window.end {
        return Err(CoreError::Validation(format!(
            "inverted window {}..{}",
            window.start, window.end
        )));
    }

    let resolved =
        window_reader::read_video_window(store, video_id, window, params.event_batch_size)?
            .ok_or_else(|| CoreError::Validation(format!("unknown video {video_id}")))?;

    // A creator interacting with their own upload is not audience
    // engagement; drop those events before feature extraction.
    let creator_id = resolved.video.creator_id;
    let events: Vec<_> = resolved
        .events
        .into_iter()
        .filter(|e| e.user_id != creator_id)
        .collect();

    let (feats, participants) = features::extract(&resolved.video, &events, window);
    let trust = TrustResolver::from_users(&resolved.users);
    let creator_trust_score = store
        .user(creator_id)?
        .and_then(|u| u.creator_trust_score);

    let details = scoring::score_window(
        video_id,
        window.start,
        window.end,
        feats,
        &participants,
        &trust,
        creator_trust_score,
    );

    write_aggregate(store, &details)?;

    log::debug!(
        "video {video_id} window {}..{}: eis={:.1} (ae={:.1} cq={:.1} li={:.1} rc={:.1})",
        window.start,
        window.end,
        details.eis,
        details.authentic_engagement,
        details.comment_quality,
        details.like_integrity,
        details.report_credibility,
    );

    Ok(details)
}

/// Persist the aggregate row and refresh the video's latest EIS.
fn write_aggregate(store: &CoreStore, details: &EisDetails) -> CoreResult<()> {
    let agg = AggregateRow {
        video_id: details.video_id,
        window_start: details.window_start,
        window_end: details.window_end,
        features: serde_json::to_string(&details.features)?,
        comment_quality: details.comment_quality,
        like_integrity: details.like_integrity,
        report_credibility: details.report_credibility,
        authentic_engagement: details.authentic_engagement,
        eis: details.eis,
    };
    store.upsert_aggregate(&agg)?;
    store.update_video_eis(details.video_id, details.eis, Utc::now().timestamp())?;
    Ok(())
}
