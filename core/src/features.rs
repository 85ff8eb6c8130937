//! Feature Extractor.
//!
//! Reduces one video's event sequence for a window to the schema-derived
//! feature record the EIS scorer consumes. No content is inspected;
//! every feature comes from counts, identities, devices, and timing.

use crate::{
    store::{EventRow, EventType, VideoRow},
    types::{UserId, Window},
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Per-(video, window) features. Serialized verbatim into
/// `video_aggregates.features` for explainability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowFeatures {
    pub views:    u64,
    pub likes:    u64,
    pub comments: u64,
    pub reports:  u64,
    pub shares:   u64,

    pub active_viewers:    u64,
    pub unique_commenters: u64,
    pub unique_likers:     u64,

    /// Largest fraction of likes sharing one device id. Likes without a
    /// device id never win the maximum but stay in the denominator.
    pub device_concentration_top_share: f64,
    pub ip_concentration_top_share:     f64,

    /// Worst-case distinct-user count behind a single device / ip
    /// among likes.
    pub users_per_device: u64,
    pub users_per_ip:     u64,

    /// Coefficient of variation of gaps between consecutive like
    /// timestamps. Missing below 3 likes; the scorer substitutes a
    /// neutral naturalness.
    pub inter_arrival_cv: Option<f64>,

    pub duration_s: f64,
    pub age_s:      i64,
    pub recency_s:  i64,
}

/// Event participants by type, one entry per event so repeat engagement
/// weighs repeatedly in the trust means.
#[derive(Debug, Clone, Default)]
pub struct WindowParticipants {
    pub likers:     Vec<UserId>,
    pub commenters: Vec<UserId>,
    pub reporters:  Vec<UserId>,
}

/// Extract features for one video's window. `events` must already be
/// restricted to this video and window.
pub fn extract(
    video: &VideoRow,
    events: &[EventRow],
    window: Window,
) -> (WindowFeatures, WindowParticipants) {
    let mut counts: HashMap<EventType, u64> = HashMap::new();
    let mut active: HashSet<UserId> = HashSet::new();
    let mut commenters_set: HashSet<UserId> = HashSet::new();
    let mut likers_set: HashSet<UserId> = HashSet::new();
    let mut participants = WindowParticipants::default();

    // Like-specific accumulators for clustering and timing signals.
    let mut like_ts: Vec<i64> = Vec::new();
    let mut device_likes: HashMap<&str, u64> = HashMap::new();
    let mut ip_likes: HashMap<&str, u64> = HashMap::new();
    let mut device_users: HashMap<&str, HashSet<UserId>> = HashMap::new();
    let mut ip_users: HashMap<&str, HashSet<UserId>> = HashMap::new();

    let mut max_ts: Option<i64> = None;

    for e in events {
        *counts.entry(e.event_type).or_insert(0) += 1;
        active.insert(e.user_id);
        max_ts = Some(max_ts.map_or(e.ts, |m: i64| m.max(e.ts)));

        match e.event_type {
            EventType::Like => {
                participants.likers.push(e.user_id);
                likers_set.insert(e.user_id);
                like_ts.push(e.ts);
                if let Some(dev) = e.device_id.as_deref() {
                    *device_likes.entry(dev).or_insert(0) += 1;
                    device_users.entry(dev).or_default().insert(e.user_id);
                }
                if let Some(ip) = e.ip_hash.as_deref() {
                    *ip_likes.entry(ip).or_insert(0) += 1;
                    ip_users.entry(ip).or_default().insert(e.user_id);
                }
            }
            EventType::Comment => {
                participants.commenters.push(e.user_id);
                commenters_set.insert(e.user_id);
            }
            EventType::Report => {
                participants.reporters.push(e.user_id);
            }
            _ => {}
        }
    }

    let likes = counts.get(&EventType::Like).copied().unwrap_or(0);
    let features = WindowFeatures {
        views: counts.get(&EventType::View).copied().unwrap_or(0),
        likes,
        comments: counts.get(&EventType::Comment).copied().unwrap_or(0),
        reports: counts.get(&EventType::Report).copied().unwrap_or(0),
        shares: counts.get(&EventType::Share).copied().unwrap_or(0),
        active_viewers: active.len() as u64,
        unique_commenters: commenters_set.len() as u64,
        unique_likers: likers_set.len() as u64,
        device_concentration_top_share: top_share(&device_likes, likes),
        ip_concentration_top_share: top_share(&ip_likes, likes),
        users_per_device: max_user_count(&device_users),
        users_per_ip: max_user_count(&ip_users),
        inter_arrival_cv: inter_arrival_cv(&mut like_ts),
        duration_s: video.duration_s,
        age_s: window.end - video.created_at,
        recency_s: max_ts.map_or(window.len_s(), |m| window.end - m),
    };
    (features, participants)
}

fn top_share(counts: &HashMap<&str, u64>, total_likes: u64) -> f64 {
    if total_likes == 0 {
        return 0.0;
    }
    let top = counts.values().copied().max().unwrap_or(0);
    top as f64 / total_likes as f64
}

fn max_user_count(users: &HashMap<&str, HashSet<UserId>>) -> u64 {
    users.values().map(|s| s.len() as u64).max().unwrap_or(0)
}

/// σ/μ over gaps between consecutive like timestamps, sample std-dev.
/// Fewer than 3 likes give fewer than 2 gaps: treated as missing.
fn inter_arrival_cv(like_ts: &mut Vec<i64>) -> Option<f64> {
    if like_ts.len() < 3 {
        return None;
    }
    like_ts.sort_unstable();
    let gaps: Vec<f64> = like_ts
        .windows(2)
        .map(|w| (w[1] - w[0]) as f64)
        .collect();
    let n = gaps.len() as f64;
    let mean = gaps.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        // Every like landed on the same second: perfectly regular.
        return Some(0.0);
    }
    let var = gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(var.sqrt() / mean)
}
