//! Unit Builder.
//!
//! Turns a window's raw engagement volume into EIS-weighted value units
//! per video, and tallies them per creator. Videos are processed in
//! ascending id order so unit maps are reproducible.

use crate::{
    analyzer,
    config::CoreParams,
    error::CoreResult,
    store::{CoreStore, EventType, VideoRow},
    types::{UserId, VideoId, Window},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// First-two-hours span used by the early-velocity kicker.
const EARLY_WINDOW_S: i64 = 2 * 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoUnits {
    pub video_id:    VideoId,
    pub creator_id:  UserId,
    pub eng_units:   i64,
    pub eis:         f64,
    pub kicker:      f64,
    pub value_units: f64,
}

/// Per-video value units for every video with engagement in the window.
///
/// Missing aggregates are computed on the spot rather than failing; the
/// scoring pipeline is invoked exactly as the operator surface would.
pub fn build_video_units(
    store: &CoreStore,
    params: &CoreParams,
    window: Window,
) -> CoreResult<Vec<VideoUnits>> {
    let mut out = Vec::new();

    let video_ids = store.video_ids_with_events(window)?;
    let videos = store.videos_by_ids(&video_ids)?;
    for video_id in video_ids {
        let Some(video) = videos.get(&video_id) else {
            log::warn!("events reference unknown video {video_id}; skipping");
            continue;
        };

        let eng_units = eng_units(store, params, video_id, window)?;
        if eng_units == 0 {
            continue;
        }

        let eis = match store.aggregate_for_window(video_id, window)? {
            Some(agg) => agg.eis,
            None => analyzer::analyze_window(store, params, video_id, window)?.eis,
        };

        let kicker = early_kicker(store, params, video)?;
        let value_units =
            eng_units as f64 * (eis / 100.0).clamp(0.0, 1.0).powf(params.gamma) * kicker;

        out.push(VideoUnits {
            video_id,
            creator_id: video.creator_id,
            eng_units,
            eis,
            kicker,
            value_units,
        });
    }

    Ok(out)
}

/// Integer-weighted event volume over the window's raw events.
fn eng_units(
    store: &CoreStore,
    params: &CoreParams,
    video_id: VideoId,
    window: Window,
) -> CoreResult<i64> {
    let counts = store.event_type_counts(video_id, window)?;
    let count = |t: EventType| counts.get(&t).copied().unwrap_or(0) as i64;
    let w = &params.event_weights;
    Ok(w.view * count(EventType::View)
        + w.like * count(EventType::Like)
        + w.comment * count(EventType::Comment)
        + w.share * count(EventType::Share))
}

/// Early-velocity kicker: enough views in the first two hours after
/// upload, spread over enough distinct devices and IPs.
pub fn early_kicker(store: &CoreStore, params: &CoreParams, video: &VideoRow) -> CoreResult<f64> {
    let early = Window::new(video.created_at, video.created_at + EARLY_WINDOW_S);
    let stats = store.early_view_stats(video.id, early)?;
    let views = stats.views as f64;
    let qualified = stats.views >= params.early_min_views
        && stats.unique_devices as f64 >= params.early_device_frac * views
        && stats.unique_ips as f64 >= params.early_ip_frac * views;
    Ok(if qualified { params.early_kicker } else { 1.0 })
}

/// Collapse per-video units into per-creator raw unit tallies.
/// Creator multipliers apply later, at allocation time.
pub fn creator_units(video_units: &[VideoUnits]) -> BTreeMap<UserId, f64> {
    let mut tallies: BTreeMap<UserId, f64> = BTreeMap::new();
    for vu in video_units {
        *tallies.entry(vu.creator_id).or_insert(0.0) += vu.value_units;
    }
    tallies
}

/// Operator surface: unit tallies for one UTC run day.
pub fn compute_units(
    store: &CoreStore,
    params: &CoreParams,
    run_day: NaiveDate,
) -> CoreResult<BTreeMap<UserId, f64>> {
    let start = run_day
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc()
        .timestamp();
    let window = Window::new(start, start + 86_400);
    let video_units = build_video_units(store, params, window)?;
    Ok(creator_units(&video_units))
}
