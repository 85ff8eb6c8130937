//! End-to-end revenue window runs: pool sizing, guardrails,
//! idempotency, exclusions, and ledger accounting.

use creatorpay_core::{
    finalize_revenue_window,
    store::{CoreStore, EventRow, EventType, UserRow, VideoRow},
    CancelToken, CoreError, CoreParams, Window, WindowAccounting,
};

const T0: i64 = 1_700_000_000;
const PAYMENT: &str = "revenue_split";

fn build_store() -> CoreStore {
    let store = CoreStore::in_memory().expect("in-memory store");
    store.migrate().expect("migrate");
    store
}

fn seed_user(store: &CoreStore, id: i64, is_creator: bool, kyc: Option<i64>, bot: bool) {
    store
        .insert_user(&UserRow {
            id,
            is_creator,
            likely_bot: bot,
            kyc_level: kyc,
            creator_trust_score: None,
            viewer_trust_score: Some(60.0),
            current_balance_cents: 0,
        })
        .expect("user");
}

/// One creator with one video and a day of plausible engagement.
fn seed_engagement(store: &CoreStore, creator_id: i64, video_id: i64) {
    seed_user(store, creator_id, true, Some(3), false);
    for id in 100..120 {
        seed_user(store, id, false, Some(2), false);
    }
    store
        .insert_video(&VideoRow {
            id: video_id,
            creator_id,
            created_at: T0 - 30 * 86_400,
            duration_s: 15.0,
            eis_current: 0.0,
            eis_updated_at: None,
        })
        .expect("video");
    for i in 0..80i64 {
        store
            .insert_event(&EventRow {
                event_id: 0,
                video_id,
                user_id: 100 + (i % 20),
                event_type: if i % 5 == 0 { EventType::Like } else { EventType::View },
                ts: T0 + i * 11,
                device_id: Some(format!("dev-{}", i % 20)),
                ip_hash: Some(format!("ip-{}", i % 20)),
            })
            .expect("event");
    }
}

fn accounting() -> WindowAccounting {
    WindowAccounting {
        gross_revenue_cents: 200_000,
        taxes_cents:         10_000,
        fees_cents:          20_000,
        refunds_cents:       5_000,
        costs_est_cents:     0,
    }
}

fn window() -> Window {
    Window::new(T0, T0 + 86_400)
}

fn finalize(store: &CoreStore, dry_run: bool) -> Result<creatorpay_core::RevenueWindowSummary, CoreError> {
    finalize_revenue_window(
        store,
        &CoreParams::default(),
        window(),
        accounting(),
        PAYMENT,
        dry_run,
        &CancelToken::new(),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Pool sizing respects the margin guardrail
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn pool_is_clamped_by_margin_target() {
    let store = build_store();
    seed_engagement(&store, 1, 10);

    let summary = finalize(&store, false).expect("finalize");

    // net = 165_000; pool_pct would ask 74_250 but the 60% margin on
    // gross leaves exactly 45_000.
    assert_eq!(summary.creator_pool_cents, 45_000);
    assert_eq!(summary.allocated_cents + summary.unallocated_cents, 45_000);
    assert_eq!(summary.creators_paid, 1);

    let row = store
        .find_revenue_window(window(), PAYMENT)
        .expect("query")
        .expect("row");
    let acct = accounting();
    let margin = (acct.gross_revenue_cents
        - acct.taxes_cents
        - acct.fees_cents
        - acct.refunds_cents
        - acct.costs_est_cents
        - row.creator_pool_cents) as f64
        / acct.gross_revenue_cents as f64;
    assert!(margin >= 0.60 - 1e-9, "margin {margin} below target");
}

#[test]
fn margin_guardrail_records_zero_pool_window() {
    let store = build_store();
    seed_engagement(&store, 1, 10);

    let result = finalize_revenue_window(
        &store,
        &CoreParams::default(),
        window(),
        WindowAccounting {
            costs_est_cents: 165_000, // eats the whole net
            ..accounting()
        },
        PAYMENT,
        false,
        &CancelToken::new(),
    );

    assert!(matches!(result, Err(CoreError::MarginGuardrail { .. })));
    let row = store
        .find_revenue_window(window(), PAYMENT)
        .expect("query")
        .expect("guardrail row recorded");
    assert_eq!(row.creator_pool_cents, 0);
    assert!(row.meta.contains("reason"));
    assert_eq!(store.inflow_count(PAYMENT).expect("count"), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Idempotency and dry runs
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn repeated_finalize_detects_and_skips() {
    let store = build_store();
    seed_engagement(&store, 1, 10);

    let first = finalize(&store, false).expect("first run");
    assert!(!first.skipped);
    let inflows = store.inflow_count(PAYMENT).expect("count");
    assert!(inflows > 0);

    let second = finalize(&store, false).expect("second run");
    assert!(second.skipped);
    assert_eq!(second.revenue_window_id, first.revenue_window_id);
    assert_eq!(store.inflow_count(PAYMENT).expect("count"), inflows);
}

#[test]
fn dry_run_writes_nothing() {
    let store = build_store();
    seed_engagement(&store, 1, 10);

    let summary = finalize(&store, true).expect("dry run");

    assert!(summary.dry_run);
    assert_eq!(summary.creator_pool_cents, 45_000);
    assert!(summary.allocated_cents > 0);
    assert!(store
        .find_revenue_window(window(), PAYMENT)
        .expect("query")
        .is_none());
    assert_eq!(store.inflow_count(PAYMENT).expect("count"), 0);
    let creator = store.user(1).expect("query").expect("exists");
    assert_eq!(creator.current_balance_cents, 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Boundary: empty windows and full exclusion
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn zero_event_window_records_full_pool_unallocated() {
    let store = build_store();
    seed_user(&store, 1, true, Some(3), false);

    let summary = finalize(&store, false).expect("finalize");

    assert_eq!(summary.creators_paid, 0);
    assert_eq!(summary.unallocated_cents, summary.creator_pool_cents);
    let row = store
        .find_revenue_window(window(), PAYMENT)
        .expect("query")
        .expect("row");
    assert_eq!(row.unallocated_cents, row.creator_pool_cents);
    assert_eq!(store.inflow_count(PAYMENT).expect("count"), 0);
}

#[test]
fn bot_creator_receives_nothing() {
    let store2 = build_store();
    seed_user(&store2, 1, true, Some(3), true);
    for id in 100..120 {
        seed_user(&store2, id, false, Some(2), false);
    }
    store2
        .insert_video(&VideoRow {
            id: 10,
            creator_id: 1,
            created_at: T0 - 30 * 86_400,
            duration_s: 15.0,
            eis_current: 0.0,
            eis_updated_at: None,
        })
        .expect("video");
    for i in 0..50i64 {
        store2
            .insert_event(&EventRow {
                event_id: 0,
                video_id: 10,
                user_id: 100 + (i % 20),
                event_type: EventType::View,
                ts: T0 + i * 13,
                device_id: None,
                ip_hash: None,
            })
            .expect("event");
    }

    let summary = finalize(&store2, false).expect("finalize");

    assert_eq!(summary.creators_paid, 0);
    assert_eq!(summary.unallocated_cents, summary.creator_pool_cents);
    assert_eq!(store2.inflow_count(PAYMENT).expect("count"), 0);
    assert!(store2.transactions_for_recipient(1).expect("txns").is_empty());
}

#[test]
fn kyc_level_one_creator_is_capped() {
    let store = build_store();
    seed_user(&store, 1, true, Some(1), false);
    for id in 100..120 {
        seed_user(&store, id, false, Some(2), false);
    }
    store
        .insert_video(&VideoRow {
            id: 10,
            creator_id: 1,
            created_at: T0 - 30 * 86_400,
            duration_s: 15.0,
            eis_current: 0.0,
            eis_updated_at: None,
        })
        .expect("video");
    for i in 0..50i64 {
        store
            .insert_event(&EventRow {
                event_id: 0,
                video_id: 10,
                user_id: 100 + (i % 20),
                event_type: EventType::View,
                ts: T0 + i * 13,
                device_id: None,
                ip_hash: None,
            })
            .expect("event");
    }

    let summary = finalize(&store, false).expect("finalize");

    assert_eq!(summary.allocated_cents, 5_000);
    assert_eq!(summary.unallocated_cents, summary.creator_pool_cents - 5_000);
    let txns = store.transactions_for_recipient(1).expect("txns");
    assert_eq!(txns.len(), 1);
    assert!(txns[0].amount_cents <= 5_000);
}

// ─────────────────────────────────────────────────────────────────────────────
// Ledger accounting and rev shares
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn balances_match_ledger_and_shares_match_pool() {
    let store = build_store();
    seed_engagement(&store, 1, 10);

    let summary = finalize(&store, false).expect("finalize");
    let window_id = summary.revenue_window_id.expect("window id");

    let creator = store.user(1).expect("query").expect("exists");
    assert_eq!(
        creator.current_balance_cents,
        store.ledger_net_for_user(1).expect("net")
    );
    assert_eq!(creator.current_balance_cents, summary.allocated_cents);

    let shares = store.rev_shares_for_window(window_id).expect("shares");
    assert!(!shares.is_empty());
    let share_total: i64 = shares.iter().map(|s| s.allocated_cents).sum();
    assert_eq!(share_total, summary.allocated_cents);
    assert!(share_total <= summary.creator_pool_cents);
    for s in &shares {
        assert!(s.share_pct > 0.0 && s.share_pct <= 1.0);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation and exclusivity
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn inverted_window_is_rejected_before_writes() {
    let store = build_store();
    let result = finalize_revenue_window(
        &store,
        &CoreParams::default(),
        Window::new(T0 + 86_400, T0),
        accounting(),
        PAYMENT,
        false,
        &CancelToken::new(),
    );
    assert!(matches!(result, Err(CoreError::Validation(_))));
    assert_eq!(store.inflow_count(PAYMENT).expect("count"), 0);
}

#[test]
fn negative_accounting_is_rejected() {
    let store = build_store();
    let result = finalize_revenue_window(
        &store,
        &CoreParams::default(),
        window(),
        WindowAccounting {
            gross_revenue_cents: -1,
            ..accounting()
        },
        PAYMENT,
        false,
        &CancelToken::new(),
    );
    assert!(matches!(result, Err(CoreError::Validation(_))));
}

#[test]
fn cancelled_run_takes_no_action() {
    let store = build_store();
    seed_engagement(&store, 1, 10);
    let cancel = CancelToken::new();
    cancel.cancel();

    let result = finalize_revenue_window(
        &store,
        &CoreParams::default(),
        window(),
        accounting(),
        PAYMENT,
        false,
        &cancel,
    );

    assert!(result.is_err());
    assert!(store
        .find_revenue_window(window(), PAYMENT)
        .expect("query")
        .is_none());
    assert_eq!(store.inflow_count(PAYMENT).expect("count"), 0);
}

#[test]
fn concurrent_finalize_is_locked_out() {
    let store = build_store();
    seed_engagement(&store, 1, 10);

    let guard = store
        .acquire_window_lock(window(), PAYMENT, T0)
        .expect("lock");

    let result = finalize(&store, false);
    assert!(matches!(result, Err(CoreError::WindowLocked(_))));
    assert_eq!(store.inflow_count(PAYMENT).expect("count"), 0);

    store.release_window_lock(guard).expect("release");
    finalize(&store, false).expect("runs after release");
}
