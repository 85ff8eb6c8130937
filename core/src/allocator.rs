//! Allocator.
//!
//! Turns per-creator value units and a cents pool into payable
//! allocations: creator-trust and bot multipliers, proportional
//! scaling, KYC cap enforcement with iterative redistribution, and
//! exact cent accounting. The math is pure; ledger writes live in
//! `commit_ledger` so dry runs and tests can stop short of the store.

use crate::{
    config::CoreParams,
    error::CoreResult,
    store::{CoreStore, UserRow},
    types::{Cents, UnixTs, UserId, VideoId},
    unit_builder::VideoUnits,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exclusion {
    /// Hard exclusion; overrides every other multiplier.
    LikelyBot,
    /// KYC level 0 or missing: capped to zero, units redistributed.
    KycIneligible,
}

#[derive(Debug, Clone, Default)]
pub struct AllocationOutcome {
    /// Final cents per creator. Zero-cent creators are retained so the
    /// caller can report them; ledger writes skip them.
    pub allocations: BTreeMap<UserId, Cents>,
    /// Multiplier-adjusted units, for per-video breakdowns.
    pub adjusted_units: BTreeMap<UserId, f64>,
    pub unallocated: Cents,
    pub excluded: Vec<(UserId, Exclusion)>,
}

impl AllocationOutcome {
    pub fn allocated_total(&self) -> Cents {
        self.allocations.values().sum()
    }

    pub fn paid_creators(&self) -> usize {
        self.allocations.values().filter(|&&a| a > 0).count()
    }
}

/// Allocate `pool_cents` across creators by adjusted units.
///
/// Deterministic: iteration follows creator-id order everywhere, and
/// cent-level tie-breaks are by descending adjusted units then
/// ascending id.
pub fn allocate(
    creators: &HashMap<UserId, UserRow>,
    units: &BTreeMap<UserId, f64>,
    pool_cents: Cents,
    params: &CoreParams,
) -> AllocationOutcome {
    let mut outcome = AllocationOutcome::default();

    // ── Step A: creator multipliers ────────────────────────────
    for (&creator_id, &raw_units) in units {
        let user = creators.get(&creator_id);
        let likely_bot = user.map_or(false, |u| u.likely_bot);
        if likely_bot && params.penalize_likely_bot {
            outcome.excluded.push((creator_id, Exclusion::LikelyBot));
            outcome.adjusted_units.insert(creator_id, 0.0);
            continue;
        }
        let mult = trust_multiplier(user.and_then(|u| u.creator_trust_score), params);
        outcome
            .adjusted_units
            .insert(creator_id, raw_units * mult);
    }

    // ── Step B: proportional scaling ───────────────────────────
    let total_units: f64 = outcome.adjusted_units.values().sum();
    if total_units <= 0.0 || pool_cents <= 0 {
        outcome.unallocated = pool_cents.max(0);
        return outcome;
    }

    let mut caps: BTreeMap<UserId, Cents> = BTreeMap::new();
    for (&creator_id, &u) in &outcome.adjusted_units {
        let kyc_level = creators.get(&creator_id).and_then(|c| c.kyc_level);
        caps.insert(creator_id, params.kyc_caps_cents.for_level(kyc_level));
        if u > 0.0 {
            let share = u / total_units;
            outcome
                .allocations
                .insert(creator_id, (share * pool_cents as f64).round() as Cents);
        } else {
            outcome.allocations.insert(creator_id, 0);
        }
    }

    // ── Step C: KYC caps with iterative redistribution ─────────
    // Each pass clamps over-cap creators and hands their excess to the
    // still-uncapped ones by unit share; newly-capped creators surface
    // in the next pass. Bounded by the creator count.
    let mut capped: BTreeMap<UserId, bool> = BTreeMap::new();
    for _ in 0..=outcome.allocations.len() {
        let mut excess: Cents = 0;
        for (&creator_id, alloc) in outcome.allocations.iter_mut() {
            let cap = caps[&creator_id];
            if *alloc > cap {
                excess += *alloc - cap;
                *alloc = cap;
                capped.insert(creator_id, true);
            }
        }
        if excess == 0 {
            break;
        }
        let receivers: Vec<UserId> = outcome
            .adjusted_units
            .iter()
            .filter(|(id, &u)| u > 0.0 && !capped.contains_key(id))
            .map(|(&id, _)| id)
            .collect();
        let receiver_units: f64 = receivers
            .iter()
            .map(|id| outcome.adjusted_units[id])
            .sum();
        if receivers.is_empty() || receiver_units <= 0.0 {
            outcome.unallocated += excess;
            break;
        }
        for id in receivers {
            let share = outcome.adjusted_units[&id] / receiver_units;
            *outcome.allocations.get_mut(&id).expect("allocated") +=
                (share * excess as f64).round() as Cents;
        }
    }

    // Rounding remainder: settle to the exact pool, one cent at a time.
    settle_remainder(&mut outcome, &caps, pool_cents);

    // Creators whose units survived step A but whose cap is zero were
    // silently clamped above; surface them as excluded.
    for (&creator_id, &u) in &outcome.adjusted_units {
        if u > 0.0 && caps[&creator_id] == 0 {
            outcome.excluded.push((creator_id, Exclusion::KycIneligible));
        }
    }

    outcome
}

/// `0.90 + 0.20·cts/100` under the default range; missing trust is
/// neutral 1.0.
fn trust_multiplier(creator_trust_score: Option<f64>, params: &CoreParams) -> f64 {
    match creator_trust_score {
        Some(cts) => {
            let (lo, hi) = params.trust_mult_range;
            lo + (hi - lo) * cts.clamp(0.0, 100.0) / 100.0
        }
        None => 1.0,
    }
}

/// Per-creator rounding can land a few cents off the pool in either
/// direction. Surplus goes one cent at a time to uncapped creators by
/// descending units; overshoot is clawed back one cent at a time by
/// ascending units. Whatever no one can absorb is recorded unallocated.
fn settle_remainder(
    outcome: &mut AllocationOutcome,
    caps: &BTreeMap<UserId, Cents>,
    pool_cents: Cents,
) {
    let mut remainder = pool_cents - outcome.allocated_total() - outcome.unallocated;

    if remainder > 0 {
        let mut order: Vec<UserId> = outcome
            .adjusted_units
            .iter()
            .filter(|(_, &u)| u > 0.0)
            .map(|(&id, _)| id)
            .collect();
        order.sort_by(|a, b| {
            outcome.adjusted_units[b]
                .total_cmp(&outcome.adjusted_units[a])
                .then(a.cmp(b))
        });
        while remainder > 0 {
            let mut moved = false;
            for &id in &order {
                if remainder == 0 {
                    break;
                }
                let alloc = outcome.allocations.get_mut(&id).expect("allocated");
                if *alloc < caps[&id] {
                    *alloc += 1;
                    remainder -= 1;
                    moved = true;
                }
            }
            if !moved {
                break;
            }
        }
        outcome.unallocated += remainder;
    } else if remainder < 0 {
        let mut order: Vec<UserId> = outcome
            .adjusted_units
            .iter()
            .filter(|(_, &u)| u > 0.0)
            .map(|(&id, _)| id)
            .collect();
        order.sort_by(|a, b| {
            outcome.adjusted_units[a]
                .total_cmp(&outcome.adjusted_units[b])
                .then(a.cmp(b))
        });
        let mut deficit = -remainder;
        while deficit > 0 {
            let mut moved = false;
            for &id in &order {
                if deficit == 0 {
                    break;
                }
                let alloc = outcome.allocations.get_mut(&id).expect("allocated");
                if *alloc > 0 {
                    *alloc -= 1;
                    deficit -= 1;
                    moved = true;
                }
            }
            if !moved {
                break;
            }
        }
    }
}

// ── Per-video breakdown ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoShare {
    pub video_id:        VideoId,
    pub creator_id:      UserId,
    pub eng_units:       i64,
    pub eis:             f64,
    pub vu:              f64,
    /// Fraction of the creator's allocation carried by this video.
    pub share_pct:       f64,
    pub allocated_cents: Cents,
}

/// Split each paid creator's cents across their videos by value units.
/// The last video absorbs the rounding slack so per-creator totals are
/// exact.
pub fn video_breakdown(
    video_units: &[VideoUnits],
    outcome: &AllocationOutcome,
) -> Vec<VideoShare> {
    let mut by_creator: BTreeMap<UserId, Vec<&VideoUnits>> = BTreeMap::new();
    for vu in video_units {
        by_creator.entry(vu.creator_id).or_default().push(vu);
    }

    let mut shares = Vec::new();
    for (creator_id, mut videos) in by_creator {
        let creator_cents = outcome
            .allocations
            .get(&creator_id)
            .copied()
            .unwrap_or(0);
        if creator_cents <= 0 {
            continue;
        }
        videos.sort_by_key(|v| v.video_id);
        let unit_total: f64 = videos.iter().map(|v| v.value_units).sum();
        let mut assigned: Cents = 0;
        let last = videos.len() - 1;
        for (i, v) in videos.iter().enumerate() {
            let cents = if i == last {
                creator_cents - assigned
            } else if unit_total > 0.0 {
                ((v.value_units / unit_total) * creator_cents as f64).round() as Cents
            } else {
                0
            };
            assigned += cents;
            shares.push(VideoShare {
                video_id: v.video_id,
                creator_id,
                eng_units: v.eng_units,
                eis: v.eis,
                vu: v.value_units,
                share_pct: cents as f64 / creator_cents as f64,
                allocated_cents: cents,
            });
        }
    }
    shares
}

// ── Ledger commit ──────────────────────────────────────────────

/// Rows written by one allocation run, retained for compensating
/// deletes if the surrounding finalize fails late.
#[derive(Debug, Clone, Default)]
pub struct LedgerCommit {
    pub transaction_ids: Vec<i64>,
    pub balance_deltas:  Vec<(UserId, Cents)>,
}

/// Write one pending inflow per paid creator and bump balances.
/// Insertion order is ascending creator id so replays produce the same
/// transaction sequence modulo auto-ids.
pub fn commit_ledger(
    store: &CoreStore,
    outcome: &AllocationOutcome,
    payment_type: &str,
    now: UnixTs,
) -> CoreResult<LedgerCommit> {
    let mut commit = LedgerCommit::default();
    for (&creator_id, &cents) in &outcome.allocations {
        if cents <= 0 {
            continue;
        }
        let txn_id = store.insert_inflow(creator_id, cents, payment_type, now)?;
        store.add_to_balance(creator_id, cents)?;
        commit.transaction_ids.push(txn_id);
        commit.balance_deltas.push((creator_id, cents));
    }
    log::info!(
        "ledger: {} inflows, {} cents, payment_type={payment_type}",
        commit.transaction_ids.len(),
        outcome.allocated_total(),
    );
    Ok(commit)
}
