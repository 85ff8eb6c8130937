//! Viewer Trust Score resolution.
//!
//! The core never computes trust signals itself; it reads the stored
//! `viewer_trust_score`, `likely_bot` and `kyc_level` fields maintained
//! by the KYC and bot-detection collaborators and folds them into a
//! single VTS in [0, 100]. The same adjustment is applied everywhere a
//! scorer weighs a user, so component scores stay comparable.

use crate::{
    store::UserRow,
    types::UserId,
};
use std::collections::HashMap;

const VTS_NEUTRAL: f64 = 50.0;
const BOT_MULT: f64 = 0.2;
const KYC_NONE_MULT: f64 = 0.7;
const KYC_BASIC_MULT: f64 = 0.9;

/// VTS for one user row.
pub fn vts_for_user(user: &UserRow) -> f64 {
    let base = user.viewer_trust_score.unwrap_or(VTS_NEUTRAL);
    let mut vts = base;
    if user.likely_bot {
        vts *= BOT_MULT;
    }
    vts *= match user.kyc_level {
        None | Some(0) => KYC_NONE_MULT,
        Some(1) => KYC_BASIC_MULT,
        Some(_) => 1.0,
    };
    vts.clamp(0.0, 100.0)
}

/// VTS for a user with no stored row: neutral base, unverified KYC.
pub fn vts_default() -> f64 {
    (VTS_NEUTRAL * KYC_NONE_MULT).clamp(0.0, 100.0)
}

/// Materialized VTS map for one window's participants.
#[derive(Debug, Clone, Default)]
pub struct TrustResolver {
    vts: HashMap<UserId, f64>,
}

impl TrustResolver {
    pub fn from_users(users: &HashMap<UserId, UserRow>) -> Self {
        let vts = users
            .iter()
            .map(|(&id, row)| (id, vts_for_user(row)))
            .collect();
        Self { vts }
    }

    /// VTS for an event's user. Unknown users resolve through the same
    /// defaults rather than erroring; events may outlive account rows.
    pub fn vts(&self, user_id: UserId) -> f64 {
        self.vts.get(&user_id).copied().unwrap_or_else(vts_default)
    }

    /// Mean VTS over a list of event participants (one entry per event,
    /// so repeat engagement weighs repeatedly). `None` when empty.
    pub fn mean_vts(&self, user_ids: &[UserId]) -> Option<f64> {
        if user_ids.is_empty() {
            return None;
        }
        let sum: f64 = user_ids.iter().map(|&id| self.vts(id)).sum();
        Some(sum / user_ids.len() as f64)
    }

    /// Total VTS mass, used for trust-weighted report pressure.
    pub fn vts_mass(&self, user_ids: &[UserId]) -> f64 {
        user_ids.iter().map(|&id| self.vts(id)).sum()
    }
}
