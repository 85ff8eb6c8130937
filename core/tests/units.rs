//! Unit building: EngUnits weighting, the EIS power law, and the
//! early-velocity kicker.

use creatorpay_core::{
    store::{AggregateRow, CoreStore, EventRow, EventType, UserRow, VideoRow},
    unit_builder, CoreParams, Window,
};

const T0: i64 = 1_700_000_000;

fn build_store() -> CoreStore {
    let store = CoreStore::in_memory().expect("in-memory store");
    store.migrate().expect("migrate");
    store
}

fn seed_creator(store: &CoreStore, id: i64) {
    store
        .insert_user(&UserRow {
            id,
            is_creator: true,
            likely_bot: false,
            kyc_level: Some(3),
            creator_trust_score: None,
            viewer_trust_score: None,
            current_balance_cents: 0,
        })
        .expect("creator");
}

fn seed_viewers(store: &CoreStore, ids: std::ops::RangeInclusive<i64>) {
    for id in ids {
        store
            .insert_user(&UserRow {
                id,
                is_creator: false,
                likely_bot: false,
                kyc_level: Some(2),
                creator_trust_score: None,
                viewer_trust_score: Some(60.0),
                current_balance_cents: 0,
            })
            .expect("viewer");
    }
}

fn seed_video(store: &CoreStore, id: i64, creator_id: i64, created_at: i64) {
    store
        .insert_video(&VideoRow {
            id,
            creator_id,
            created_at,
            duration_s: 15.0,
            eis_current: 0.0,
            eis_updated_at: None,
        })
        .expect("video");
}

fn seed_events(
    store: &CoreStore,
    video_id: i64,
    event_type: EventType,
    count: usize,
    viewer_pool: &[i64],
    base_ts: i64,
) {
    for i in 0..count {
        store
            .insert_event(&EventRow {
                event_id: 0,
                video_id,
                user_id: viewer_pool[i % viewer_pool.len()],
                event_type,
                ts: base_ts + i as i64 * 7,
                device_id: None,
                ip_hash: None,
            })
            .expect("event");
    }
}

fn seed_aggregate(store: &CoreStore, video_id: i64, window: Window, eis: f64) {
    store
        .upsert_aggregate(&AggregateRow {
            video_id,
            window_start: window.start,
            window_end: window.end,
            features: "{}".into(),
            comment_quality: eis,
            like_integrity: eis,
            report_credibility: eis,
            authentic_engagement: eis,
            eis,
        })
        .expect("aggregate");
}

// ─────────────────────────────────────────────────────────────────────────────
// EngUnits weights and the EIS power law
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn value_units_weight_volume_by_squared_eis() {
    let store = build_store();
    seed_creator(&store, 1);
    seed_viewers(&store, 100..=119);
    // Uploaded well before the window so the kicker stays out of play.
    seed_video(&store, 10, 1, T0 - 30 * 86_400);
    seed_video(&store, 11, 1, T0 - 30 * 86_400);

    let window = Window::new(T0, T0 + 86_400);
    let viewers: Vec<i64> = (100..=119).collect();

    // V1: 100 views, 20 likes, 5 comments → 100 + 60 + 25 = 185 units.
    seed_events(&store, 10, EventType::View, 100, &viewers, T0 + 100);
    seed_events(&store, 10, EventType::Like, 20, &viewers, T0 + 2_000);
    seed_events(&store, 10, EventType::Comment, 5, &viewers, T0 + 4_000);
    // V2: 100 views, 2 likes → 106 units.
    seed_events(&store, 11, EventType::View, 100, &viewers, T0 + 100);
    seed_events(&store, 11, EventType::Like, 2, &viewers, T0 + 2_000);

    seed_aggregate(&store, 10, window, 80.0);
    seed_aggregate(&store, 11, window, 20.0);

    let params = CoreParams::default();
    let units = unit_builder::build_video_units(&store, &params, window).expect("units");
    assert_eq!(units.len(), 2);

    let v1 = units.iter().find(|u| u.video_id == 10).expect("v1");
    let v2 = units.iter().find(|u| u.video_id == 11).expect("v2");

    assert_eq!(v1.eng_units, 185);
    assert_eq!(v2.eng_units, 106);
    assert!((v1.value_units - 118.4).abs() < 1e-9, "got {}", v1.value_units);
    assert!((v2.value_units - 4.24).abs() < 1e-9, "got {}", v2.value_units);

    let creators = unit_builder::creator_units(&units);
    assert!((creators[&1] - 122.64).abs() < 1e-9, "got {}", creators[&1]);
}

#[test]
fn gamma_zero_makes_eis_irrelevant() {
    let store = build_store();
    seed_creator(&store, 1);
    seed_viewers(&store, 100..=109);
    seed_video(&store, 10, 1, T0 - 30 * 86_400);

    let window = Window::new(T0, T0 + 86_400);
    let viewers: Vec<i64> = (100..=109).collect();
    seed_events(&store, 10, EventType::View, 50, &viewers, T0 + 100);
    seed_aggregate(&store, 10, window, 7.0); // dismal EIS

    let params = CoreParams {
        gamma: 0.0,
        ..CoreParams::default()
    };
    let units = unit_builder::build_video_units(&store, &params, window).expect("units");
    assert!((units[0].value_units - units[0].eng_units as f64).abs() < 1e-9);
}

// ─────────────────────────────────────────────────────────────────────────────
// Early-velocity kicker
// ─────────────────────────────────────────────────────────────────────────────

fn seed_early_views(store: &CoreStore, video_id: i64, created_at: i64, devices: usize, ips: usize) {
    // 60 views in the first two hours, spread across the given pools.
    for i in 0..60usize {
        store
            .insert_event(&EventRow {
                event_id: 0,
                video_id,
                user_id: 100 + (i % 20) as i64,
                event_type: EventType::View,
                ts: created_at + 60 * i as i64,
                device_id: Some(format!("dev-{}", i % devices)),
                ip_hash: Some(format!("ip-{}", i % ips)),
            })
            .expect("early view");
    }
}

#[test]
fn kicker_requires_volume_and_diversity() {
    let store = build_store();
    seed_creator(&store, 1);
    seed_viewers(&store, 100..=119);
    seed_video(&store, 10, 1, T0);
    seed_video(&store, 11, 1, T0);

    // 60 views / 40 devices (0.67 ≥ 0.5) / 30 ips (0.5 ≥ 0.4): qualifies.
    seed_early_views(&store, 10, T0, 40, 30);
    // 60 views but everything funnels through 5 devices: fails.
    seed_early_views(&store, 11, T0, 5, 30);

    let params = CoreParams::default();
    let v10 = store.video(10).expect("query").expect("exists");
    let v11 = store.video(11).expect("query").expect("exists");

    assert_eq!(unit_builder::early_kicker(&store, &params, &v10).expect("kicker"), 1.05);
    assert_eq!(unit_builder::early_kicker(&store, &params, &v11).expect("kicker"), 1.0);
}

#[test]
fn kicker_requires_minimum_views() {
    let store = build_store();
    seed_creator(&store, 1);
    seed_viewers(&store, 100..=119);
    seed_video(&store, 10, 1, T0);

    // Great diversity but only 30 views: below the 50-view floor.
    for i in 0..30usize {
        store
            .insert_event(&EventRow {
                event_id: 0,
                video_id: 10,
                user_id: 100 + (i % 20) as i64,
                event_type: EventType::View,
                ts: T0 + 60 * i as i64,
                device_id: Some(format!("dev-{i}")),
                ip_hash: Some(format!("ip-{i}")),
            })
            .expect("early view");
    }

    let params = CoreParams::default();
    let video = store.video(10).expect("query").expect("exists");
    assert_eq!(unit_builder::early_kicker(&store, &params, &video).expect("kicker"), 1.0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Missing aggregates are computed on demand
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn missing_aggregate_triggers_analysis() {
    let store = build_store();
    seed_creator(&store, 1);
    seed_viewers(&store, 100..=109);
    seed_video(&store, 10, 1, T0 - 30 * 86_400);

    let window = Window::new(T0, T0 + 86_400);
    let viewers: Vec<i64> = (100..=109).collect();
    seed_events(&store, 10, EventType::View, 40, &viewers, T0 + 100);
    seed_events(&store, 10, EventType::Like, 6, &viewers, T0 + 2_000);

    assert!(store.aggregate_for_window(10, window).expect("query").is_none());

    let params = CoreParams::default();
    let units = unit_builder::build_video_units(&store, &params, window).expect("units");

    assert_eq!(units.len(), 1);
    assert_eq!(units[0].eng_units, 40 + 6 * 3);
    let agg = store
        .aggregate_for_window(10, window)
        .expect("query")
        .expect("computed on demand");
    assert!((units[0].eis - agg.eis).abs() < 1e-9);
}

// ─────────────────────────────────────────────────────────────────────────────
// Daily operator wrapper
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn compute_units_covers_one_utc_day() {
    let store = build_store();
    seed_creator(&store, 1);
    seed_viewers(&store, 100..=109);

    let day = chrono::NaiveDate::from_ymd_opt(2026, 7, 15).expect("date");
    let day_start = day
        .and_hms_opt(0, 0, 0)
        .expect("midnight")
        .and_utc()
        .timestamp();
    seed_video(&store, 10, 1, day_start - 30 * 86_400);

    let viewers: Vec<i64> = (100..=109).collect();
    seed_events(&store, 10, EventType::View, 30, &viewers, day_start + 100);
    // An event past midnight must not count.
    seed_events(&store, 10, EventType::Share, 1, &viewers, day_start + 86_400 + 1);

    let params = CoreParams::default();
    let units = unit_builder::compute_units(&store, &params, day).expect("units");

    assert_eq!(units.len(), 1);
    let window = Window::new(day_start, day_start + 86_400);
    let agg = store
        .aggregate_for_window(10, window)
        .expect("query")
        .expect("aggregate");
    let expected = 30.0 * (agg.eis / 100.0).powi(2);
    assert!((units[&1] - expected).abs() < 1e-9, "got {} want {expected}", units[&1]);
}
