//! EIS Scorer.
//!
//! Four component scores in [0, 100] blended into the per-window
//! Engagement Integrity Score. Inputs are the extracted features, the
//! resolved VTS map, and the creator's stored trust score, nothing
//! else, so a window can always be re-scored to the same value.

use crate::{
    features::{WindowFeatures, WindowParticipants},
    trust::TrustResolver,
    types::{UnixTs, VideoId},
};
use serde::{Deserialize, Serialize};

const DAY_S: f64 = 86_400.0;

/// Blend weights. AE dominates; report pressure has the smallest say.
const W_AE: f64 = 0.40;
const W_CQ: f64 = 0.25;
const W_LI: f64 = 0.20;
const W_RC: f64 = 0.15;

/// Full scoring output for one (video, window), as returned by the
/// `analyze_window` operator surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EisDetails {
    pub video_id:     VideoId,
    pub window_start: UnixTs,
    pub window_end:   UnixTs,
    pub features:     WindowFeatures,

    pub authentic_engagement: f64,
    pub comment_quality:      f64,
    pub like_integrity:       f64,
    pub report_credibility:   f64,
    pub eis:                  f64,

    pub creator_trust_score: Option<f64>,
}

/// Authentic Engagement: engagement density against duration-scaled
/// targets, discounted for stale windows, with a small audience factor.
pub fn authentic_engagement(f: &WindowFeatures) -> f64 {
    let target_lpv = (0.08 * (15.0 / f.duration_s)).clamp(0.02, 0.25);
    let target_cpv = (0.02 * (15.0 / f.duration_s)).clamp(0.005, 0.08);

    let views = f.views.max(1) as f64;
    let lpv = f.likes as f64 / views;
    let cpv = f.comments as f64 / views;
    let s_l = (lpv / target_lpv).min(1.0);
    let s_c = (cpv / target_cpv).min(1.0);

    let age = f.age_s as f64;
    let rec = if age <= DAY_S {
        1.0
    } else {
        (1.0 - (age - DAY_S) / (7.0 * DAY_S)).max(0.6)
    };
    let aud = (f.active_viewers as f64 / 50.0).min(1.0);

    (100.0 * rec * (0.4 * s_l + 0.4 * s_c + 0.2 * aud)).clamp(0.0, 100.0)
}

/// Comment Quality: who comments, not what they say. Neutral when the
/// window has no comments at all.
pub fn comment_quality(f: &WindowFeatures, p: &WindowParticipants, trust: &TrustResolver) -> f64 {
    if f.comments == 0 {
        return 50.0;
    }
    let unique_rate = f.unique_commenters as f64 / f.comments.max(1) as f64;
    let avg_vts = trust.mean_vts(&p.commenters).unwrap_or(50.0) / 100.0;
    (100.0 * (0.5 * unique_rate + 0.5 * avg_vts)).clamp(0.0, 100.0)
}

/// Like Integrity: trusted likers, natural timing, no device/IP
/// clustering. Neutral when there are no likes to judge.
pub fn like_integrity(f: &WindowFeatures, p: &WindowParticipants, trust: &TrustResolver) -> f64 {
    if f.likes == 0 {
        return 50.0;
    }
    let base = trust.mean_vts(&p.likers).unwrap_or(50.0) / 100.0;
    let nat = match f.inter_arrival_cv {
        Some(cv) => (cv / 0.6).clamp(0.0, 1.0),
        None => 0.7,
    };
    let top = f
        .device_concentration_top_share
        .max(f.ip_concentration_top_share);
    let clus = (top - 0.2).clamp(0.0, 0.6) / 0.6;

    (100.0 * (0.5 * base + 0.3 * nat - 0.4 * clus + 0.1).max(0.0)).clamp(0.0, 100.0)
}

/// Report Credibility: trust-weighted report mass against a view-scaled
/// tolerance. Trusted reporters pull the score down fast; throwaway
/// accounts barely move it.
pub fn report_credibility(f: &WindowFeatures, p: &WindowParticipants, trust: &TrustResolver) -> f64 {
    let w = trust.vts_mass(&p.reporters) / 100.0;
    let tolerance = (0.05 * f.views as f64).max(5.0);
    (100.0 * (1.0 - w / tolerance).max(0.0)).clamp(0.0, 100.0)
}

/// Blend the four components and apply creator-trust modulation.
pub fn eis_score(ae: f64, cq: f64, li: f64, rc: f64, creator_trust_score: Option<f64>) -> f64 {
    let mut eis = W_AE * ae + W_CQ * cq + W_LI * li + W_RC * rc;
    if let Some(cts) = creator_trust_score {
        let factor = (0.95 + (cts - 50.0) / 1000.0).clamp(0.95, 1.05);
        eis *= factor;
    }
    eis.clamp(0.0, 100.0)
}

/// Score one extracted window end to end.
pub fn score_window(
    video_id: VideoId,
    window_start: UnixTs,
    window_end: UnixTs,
    features: WindowFeatures,
    participants: &WindowParticipants,
    trust: &TrustResolver,
    creator_trust_score: Option<f64>,
) -> EisDetails {
    let ae = authentic_engagement(&features);
    let cq = comment_quality(&features, participants, trust);
    let li = like_integrity(&features, participants, trust);
    let rc = report_credibility(&features, participants, trust);
    let eis = eis_score(ae, cq, li, rc, creator_trust_score);

    EisDetails {
        video_id,
        window_start,
        window_end,
        features,
        authentic_engagement: ae,
        comment_quality: cq,
        like_integrity: li,
        report_credibility: rc,
        eis,
        creator_trust_score,
    }
}
