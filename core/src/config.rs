//! Run parameters.
//!
//! RULE: every entrypoint receives an explicit `CoreParams`. There are no
//! process-global tunables; two runs with the same store contents and the
//! same params produce identical output.

use crate::types::Cents;
use serde::{Deserialize, Serialize};

/// Integer weights for EngUnits. `follow` and `pause` events carry no
/// engagement weight but still count toward active viewers and recency.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventWeights {
    pub view:    i64,
    pub like:    i64,
    pub comment: i64,
    pub share:   i64,
}

impl Default for EventWeights {
    fn default() -> Self {
        Self { view: 1, like: 3, comment: 5, share: 8 }
    }
}

/// Per-run KYC ceilings on a single creator's inflow, in cents.
/// Level 0 (and missing KYC) pays nothing; level 3 and above is uncapped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KycCapsCents {
    pub level0: Cents,
    pub level1: Cents,
    pub level2: Cents,
}

impl Default for KycCapsCents {
    fn default() -> Self {
        Self { level0: 0, level1: 5_000, level2: 50_000 }
    }
}

impl KycCapsCents {
    /// Cap for a stored `kyc_level`. NULL is treated as level 0.
    pub fn for_level(&self, kyc_level: Option<i64>) -> Cents {
        match kyc_level {
            None | Some(0) => self.level0,
            Some(1) => self.level1,
            Some(2) => self.level2,
            Some(_) => Cents::MAX,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreParams {
    // ── Unit building ──────────────────────────────────────────
    pub event_weights:     EventWeights,
    /// Power applied to EIS/100 when weighting EngUnits.
    pub gamma:             f64,
    pub early_min_views:   u64,
    pub early_device_frac: f64,
    pub early_ip_frac:     f64,
    pub early_kicker:      f64,

    // ── Allocation ─────────────────────────────────────────────
    /// Creator trust multiplier range; midpoint applies at trust 50.
    pub trust_mult_range:   (f64, f64),
    pub kyc_caps_cents:     KycCapsCents,
    pub penalize_likely_bot: bool,

    // ── Pool sizing ────────────────────────────────────────────
    pub pool_pct:         f64,
    pub margin_target:    f64,
    pub risk_reserve_pct: f64,
    pub platform_fee_pct: f64,

    // ── Ambient ────────────────────────────────────────────────
    /// Event reader page size; bounds memory over large windows.
    pub event_batch_size: usize,
    /// Transient-error retries at operator entrypoints.
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for CoreParams {
    fn default() -> Self {
        Self {
            event_weights:       EventWeights::default(),
            gamma:               2.0,
            early_min_views:     50,
            early_device_frac:   0.5,
            early_ip_frac:       0.4,
            early_kicker:        1.05,
            trust_mult_range:    (0.90, 1.10),
            kyc_caps_cents:      KycCapsCents::default(),
            penalize_likely_bot: true,
            pool_pct:            0.45,
            margin_target:       0.60,
            risk_reserve_pct:    0.10,
            platform_fee_pct:    0.10,
            event_batch_size:    10_000,
            retry_max_attempts:  3,
            retry_base_delay_ms: 250,
        }
    }
}

impl CoreParams {
    /// Load operator overrides from a JSON file. Missing keys fall back
    /// to the defaults above.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let params: Self = serde_json::from_str(&content)?;
        params.validate().map_err(|e| anyhow::anyhow!("{path}: {e}"))?;
        Ok(params)
    }

    /// Reject parameter bags no run should ever see.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.pool_pct) {
            return Err(format!("pool_pct out of [0,1]: {}", self.pool_pct));
        }
        if !(0.0..=1.0).contains(&self.margin_target) {
            return Err(format!("margin_target out of [0,1]: {}", self.margin_target));
        }
        if !(0.0..=1.0).contains(&self.risk_reserve_pct) || !(0.0..=1.0).contains(&self.platform_fee_pct) {
            return Err("reserve/fee percentages out of [0,1]".into());
        }
        if self.gamma < 0.0 {
            return Err(format!("gamma must be non-negative: {}", self.gamma));
        }
        if self.trust_mult_range.0 > self.trust_mult_range.1 {
            return Err("trust_mult_range inverted".into());
        }
        if self.event_batch_size == 0 {
            return Err("event_batch_size must be positive".into());
        }
        Ok(())
    }
}
