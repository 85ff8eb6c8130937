//! Revenue Window Finalizer.
//!
//! Drives a full window run: sizes the creator pool under the margin
//! guardrail, builds units, allocates, and records the revenue window
//! with its per-video shares. Exactly one RevenueWindow row may exist
//! per (window_start, window_end, payment_type); an advisory lock row
//! keeps concurrent finalizers out and repeated calls detect the
//! existing row and skip.

use crate::{
    allocator::{self, AllocationOutcome, Exclusion, LedgerCommit},
    config::CoreParams,
    error::{CoreError, CoreResult},
    retry::RetryPolicy,
    store::{CoreStore, RevenueWindowRow, VideoRevShareRow},
    types::{CancelToken, Cents, UserId, Window},
    unit_builder,
};
use chrono::Utc;
use serde_json::json;

/// Accounting figures for one window, all in cents.
#[derive(Debug, Clone, Copy)]
pub struct WindowAccounting {
    pub gross_revenue_cents: Cents,
    pub taxes_cents:         Cents,
    pub fees_cents:          Cents,
    pub refunds_cents:       Cents,
    pub costs_est_cents:     Cents,
}

#[derive(Debug, Clone)]
pub struct RevenueWindowSummary {
    pub revenue_window_id:  Option<i64>,
    pub window:             Window,
    pub payment_type:       String,
    pub creator_pool_cents: Cents,
    pub allocated_cents:    Cents,
    pub unallocated_cents:  Cents,
    pub reserve_cents:      Cents,
    pub creators_paid:      usize,
    pub excluded:           Vec<(UserId, Exclusion)>,
    pub dry_run:            bool,
    /// True when an existing RevenueWindow row was found and the call
    /// became a no-op.
    pub skipped:            bool,
}

/// Operator surface. Transient storage errors are retried here with
/// exponential backoff; every inner stage fails fast, and the whole
/// operation is idempotent, so a retry restarts cleanly.
pub fn finalize_revenue_window(
    store: &CoreStore,
    params: &CoreParams,
    window: Window,
    accounting: WindowAccounting,
    payment_type: &str,
    dry_run: bool,
    cancel: &CancelToken,
) -> CoreResult<RevenueWindowSummary> {
    validate(params, window, &accounting)?;
    let policy = RetryPolicy::new(params.retry_max_attempts, params.retry_base_delay_ms);
    policy.run("finalize_revenue_window", || {
        run_once(store, params, window, accounting, payment_type, dry_run, cancel)
    })
}

fn validate(params: &CoreParams, window: Window, acct: &WindowAccounting) -> CoreResult<()> {
    params
        .validate()
        .map_err(CoreError::Validation)?;
    if window.start >= window.end {
        return Err(CoreError::Validation(format!(
            "inverted window {}..{}",
            window.start, window.end
        )));
    }
    let figures = [
        ("gross_revenue_cents", acct.gross_revenue_cents),
        ("taxes_cents", acct.taxes_cents),
        ("fees_cents", acct.fees_cents),
        ("refunds_cents", acct.refunds_cents),
        ("costs_est_cents", acct.costs_est_cents),
    ];
    for (name, value) in figures {
        if value < 0 {
            return Err(CoreError::Validation(format!("{name} is negative: {value}")));
        }
    }
    Ok(())
}

fn run_once(
    store: &CoreStore,
    params: &CoreParams,
    window: Window,
    accounting: WindowAccounting,
    payment_type: &str,
    dry_run: bool,
    cancel: &CancelToken,
) -> CoreResult<RevenueWindowSummary> {
    if cancel.is_cancelled() {
        return Err(CoreError::Validation("run cancelled before start".into()));
    }

    let now = Utc::now().timestamp();
    let lock = store.acquire_window_lock(window, payment_type, now)?;
    let result = run_locked(store, params, window, accounting, payment_type, dry_run, cancel, now);
    if let Err(e) = store.release_window_lock(lock) {
        // The lock row stays behind for operator cleanup; never mask
        // the run's own result with it.
        log::warn!("failed to release window lock: {e}");
    }
    result
}

#[allow(clippy::too_many_arguments)]
fn run_locked(
    store: &CoreStore,
    params: &CoreParams,
    window: Window,
    acct: WindowAccounting,
    payment_type: &str,
    dry_run: bool,
    cancel: &CancelToken,
    now: i64,
) -> CoreResult<RevenueWindowSummary> {
    // Idempotency: a finalized window is never re-run.
    if let Some(existing) = store.find_revenue_window(window, payment_type)? {
        log::info!(
            "revenue window {}..{} {payment_type} already finalized (id {:?}); skipping",
            window.start,
            window.end,
            existing.id
        );
        return Ok(RevenueWindowSummary {
            revenue_window_id: existing.id,
            window,
            payment_type: payment_type.to_string(),
            creator_pool_cents: existing.creator_pool_cents,
            allocated_cents: existing.creator_pool_cents - existing.unallocated_cents,
            unallocated_cents: existing.unallocated_cents,
            reserve_cents: 0,
            creators_paid: 0,
            excluded: Vec::new(),
            dry_run,
            skipped: true,
        });
    }

    // ── Pool sizing under the margin guardrail ─────────────────
    let gross = acct.gross_revenue_cents;
    let net = gross - acct.taxes_cents - acct.fees_cents - acct.refunds_cents;
    let cap_by_margin = ((net - acct.costs_est_cents) as f64
        - params.margin_target * gross as f64)
        .floor()
        .max(0.0) as Cents;
    let creator_pool = ((params.pool_pct * net.max(0) as f64).round() as Cents).min(cap_by_margin);
    let reserve_cents = (params.risk_reserve_pct * net.max(0) as f64).round() as Cents;

    if creator_pool <= 0 {
        let reason = format!(
            "margin target {:.2} leaves no creator pool (net {net}, costs {})",
            params.margin_target, acct.costs_est_cents
        );
        if !dry_run {
            let row = window_row(
                window,
                payment_type,
                &acct,
                params,
                0,
                0,
                json!({ "reason": reason.clone(), "reserve_cents": reserve_cents }),
            );
            store.insert_revenue_window(&row)?;
        }
        return Err(CoreError::MarginGuardrail {
            window_start: window.start,
            window_end: window.end,
            reason,
        });
    }

    // ── Units and allocation ───────────────────────────────────
    let video_units = unit_builder::build_video_units(store, params, window)?;
    let units = unit_builder::creator_units(&video_units);
    let creator_ids: Vec<UserId> = units.keys().copied().collect();
    let creators = store.users_by_ids(&creator_ids)?;
    let outcome = allocator::allocate(&creators, &units, creator_pool, params);

    log::info!(
        "window {}..{} {payment_type}: pool={creator_pool} allocated={} unallocated={} \
         creators={} excluded={}",
        window.start,
        window.end,
        outcome.allocated_total(),
        outcome.unallocated,
        outcome.paid_creators(),
        outcome.excluded.len(),
    );

    if dry_run {
        return Ok(summary(None, window, payment_type, creator_pool, reserve_cents, &outcome, true));
    }

    // Last point of no return: after the ledger lands, the run is
    // driven to completion (or compensated) regardless of cancel.
    if cancel.is_cancelled() {
        return Err(CoreError::Validation(
            "run cancelled before ledger writes".into(),
        ));
    }

    let commit = allocator::commit_ledger(store, &outcome, payment_type, now)?;

    let shares = allocator::video_breakdown(&video_units, &outcome);
    let meta = json!({
        "reserve_cents": reserve_cents,
        "creators_paid": outcome.paid_creators(),
        "excluded": outcome.excluded.len(),
    });
    let row = window_row(
        window,
        payment_type,
        &acct,
        params,
        creator_pool,
        outcome.unallocated,
        meta,
    );

    let window_id = match write_window_and_shares(store, &row, &shares) {
        Ok(id) => id,
        Err(e) => return Err(compensate(store, window, payment_type, &acct, params, &commit, e)),
    };

    Ok(summary(
        Some(window_id),
        window,
        payment_type,
        creator_pool,
        reserve_cents,
        &outcome,
        false,
    ))
}

fn write_window_and_shares(
    store: &CoreStore,
    row: &RevenueWindowRow,
    shares: &[allocator::VideoShare],
) -> CoreResult<i64> {
    let window_id = store.insert_revenue_window(row)?;
    for s in shares {
        store.insert_video_rev_share(&VideoRevShareRow {
            id: None,
            revenue_window_id: window_id,
            video_id: s.video_id,
            eng_units: s.eng_units,
            eis_avg: s.eis,
            vu: s.vu,
            share_pct: s.share_pct,
            allocated_cents: s.allocated_cents,
            meta: json!({ "creator_id": s.creator_id }).to_string(),
        })?;
    }
    Ok(window_id)
}

/// Undo this run's ledger writes after a late storage failure. If the
/// undo itself fails, leave a pending marker row and surface a
/// PartialCommit for operator repair.
fn compensate(
    store: &CoreStore,
    window: Window,
    payment_type: &str,
    acct: &WindowAccounting,
    params: &CoreParams,
    commit: &LedgerCommit,
    cause: CoreError,
) -> CoreError {
    log::error!(
        "window {}..{} {payment_type}: storage failure after ledger writes ({cause}); \
         compensating {} transactions",
        window.start,
        window.end,
        commit.transaction_ids.len(),
    );

    let undo = store
        .delete_transactions(&commit.transaction_ids)
        .and_then(|_| {
            for &(user_id, cents) in &commit.balance_deltas {
                store.add_to_balance(user_id, -cents)?;
            }
            Ok(())
        });

    match undo {
        Ok(()) => cause,
        Err(undo_err) => {
            let orphaned: Cents = commit.balance_deltas.iter().map(|&(_, c)| c).sum();
            let marker = window_row(
                window,
                payment_type,
                acct,
                params,
                0,
                0,
                json!({
                    "status": "pending",
                    "error": cause.to_string(),
                    "compensation_error": undo_err.to_string(),
                    "orphaned_cents": orphaned,
                }),
            );
            if let Err(marker_err) = store.insert_revenue_window(&marker) {
                log::error!("failed to write pending marker row: {marker_err}");
            }
            CoreError::PartialCommit {
                window_start: window.start,
                window_end: window.end,
                reason: format!("{cause}; compensation failed: {undo_err}"),
                orphaned_cents: orphaned,
            }
        }
    }
}

fn window_row(
    window: Window,
    payment_type: &str,
    acct: &WindowAccounting,
    params: &CoreParams,
    creator_pool: Cents,
    unallocated: Cents,
    meta: serde_json::Value,
) -> RevenueWindowRow {
    RevenueWindowRow {
        id: None,
        window_start: window.start,
        window_end: window.end,
        payment_type: payment_type.to_string(),
        gross_revenue_cents: acct.gross_revenue_cents,
        taxes_cents: acct.taxes_cents,
        fees_cents: acct.fees_cents,
        refunds_cents: acct.refunds_cents,
        pool_pct: params.pool_pct,
        margin_target: params.margin_target,
        platform_fee_pct: params.platform_fee_pct,
        risk_reserve_pct: params.risk_reserve_pct,
        costs_est_cents: acct.costs_est_cents,
        creator_pool_cents: creator_pool,
        unallocated_cents: unallocated,
        meta: meta.to_string(),
    }
}

fn summary(
    revenue_window_id: Option<i64>,
    window: Window,
    payment_type: &str,
    creator_pool: Cents,
    reserve_cents: Cents,
    outcome: &AllocationOutcome,
    dry_run: bool,
) -> RevenueWindowSummary {
    RevenueWindowSummary {
        revenue_window_id,
        window,
        payment_type: payment_type.to_string(),
        creator_pool_cents: creator_pool,
        allocated_cents: outcome.allocated_total(),
        unallocated_cents: outcome.unallocated,
        reserve_cents,
        creators_paid: outcome.paid_creators(),
        excluded: outcome.excluded.clone(),
        dry_run,
        skipped: false,
    }
}
