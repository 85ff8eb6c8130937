//! payout-runner: headless operator CLI for the payouts core.
//!
//! Usage:
//!   payout-runner finalize --db payouts.db --start 2026-07-01T00:00:00Z --end 2026-08-01T00:00:00Z \
//!       --gross 200000 --taxes 10000 --fees 20000 --refunds 5000 --payment-type revenue_split [--dry-run]
//!   payout-runner compute-units --db payouts.db --day 2026-07-15
//!   payout-runner analyze --db payouts.db --video 42 --start ... --end ...
//!
//! Prints an allocation summary at the end of the run. Exits 2 on bad
//! arguments or validation rejects, 1 on any other error.

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use creatorpay_core::{
    analyze_window, compute_units, finalize_revenue_window, CancelToken, CoreError, CoreParams,
    CoreStore, Window, WindowAccounting,
};
use std::env;
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    let Some(command) = args.get(1).map(String::as_str) else {
        eprintln!("usage: payout-runner <finalize|compute-units|analyze> [options]");
        return ExitCode::from(2);
    };

    let result = match command {
        "finalize" => cmd_finalize(&args),
        "compute-units" => cmd_compute_units(&args),
        "analyze" => cmd_analyze(&args),
        other => Err(anyhow!("unknown command '{other}'")),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("payout-runner: {e:#}");
            let validation = e
                .downcast_ref::<CoreError>()
                .map(|c| matches!(c, CoreError::Validation(_)))
                .unwrap_or(false);
            ExitCode::from(if validation { 2 } else { 1 })
        }
    }
}

fn cmd_finalize(args: &[String]) -> Result<()> {
    let store = open_store(args)?;
    let params = load_params(args)?;
    let window = parse_window(args)?;
    let accounting = WindowAccounting {
        gross_revenue_cents: parse_arg(args, "--gross", 0),
        taxes_cents:         parse_arg(args, "--taxes", 0),
        fees_cents:          parse_arg(args, "--fees", 0),
        refunds_cents:       parse_arg(args, "--refunds", 0),
        costs_est_cents:     parse_arg(args, "--costs", 0),
    };
    let payment_type = string_arg(args, "--payment-type").unwrap_or("revenue_split".into());
    let dry_run = args.iter().any(|a| a == "--dry-run");

    println!("payout-runner finalize");
    println!("  window:       {}..{}", window.start, window.end);
    println!("  payment_type: {payment_type}");
    println!("  gross:        {} cents", accounting.gross_revenue_cents);
    println!("  dry_run:      {dry_run}");
    println!();

    let summary = finalize_revenue_window(
        &store,
        &params,
        window,
        accounting,
        &payment_type,
        dry_run,
        &CancelToken::new(),
    )?;

    println!("=== ALLOCATION SUMMARY ===");
    if summary.skipped {
        println!("  already finalized (revenue_window id {:?}), skipping", summary.revenue_window_id);
        return Ok(());
    }
    println!("  revenue_window:  {:?}", summary.revenue_window_id);
    println!("  creator pool:    {} cents", summary.creator_pool_cents);
    println!("  allocated:       {} cents", summary.allocated_cents);
    println!("  unallocated:     {} cents", summary.unallocated_cents);
    println!("  reserve marker:  {} cents", summary.reserve_cents);
    println!("  creators paid:   {}", summary.creators_paid);
    println!("  excluded:        {}", summary.excluded.len());
    for (creator_id, reason) in &summary.excluded {
        println!("    creator {creator_id}: {reason:?}");
    }
    Ok(())
}

fn cmd_compute_units(args: &[String]) -> Result<()> {
    let store = open_store(args)?;
    let params = load_params(args)?;
    let day: NaiveDate = string_arg(args, "--day")
        .ok_or_else(|| anyhow!("--day YYYY-MM-DD is required"))?
        .parse()
        .map_err(|e| anyhow!("bad --day: {e}"))?;

    let units = compute_units(&store, &params, day)?;
    let total: f64 = units.values().sum();

    println!("=== UNITS {day} ===");
    println!("  creators: {}", units.len());
    println!("  total:    {total:.4}");
    for (creator_id, u) in &units {
        println!("  creator {creator_id}: {u:.4}");
    }
    Ok(())
}

fn cmd_analyze(args: &[String]) -> Result<()> {
    let store = open_store(args)?;
    let params = load_params(args)?;
    let video = parse_arg(args, "--video", -1i64);
    if video < 0 {
        return Err(anyhow!("--video <id> is required"));
    }
    let window = parse_window(args)?;

    let details = analyze_window(&store, &params, video, window)?;
    println!("=== EIS video {video} window {}..{} ===", window.start, window.end);
    println!("  eis:                  {:.2}", details.eis);
    println!("  authentic_engagement: {:.2}", details.authentic_engagement);
    println!("  comment_quality:      {:.2}", details.comment_quality);
    println!("  like_integrity:       {:.2}", details.like_integrity);
    println!("  report_credibility:   {:.2}", details.report_credibility);
    println!(
        "  views={} likes={} comments={} reports={} shares={} active_viewers={}",
        details.features.views,
        details.features.likes,
        details.features.comments,
        details.features.reports,
        details.features.shares,
        details.features.active_viewers,
    );
    Ok(())
}

// ── Argument plumbing ──────────────────────────────────────────

fn open_store(args: &[String]) -> Result<CoreStore> {
    let db = string_arg(args, "--db").unwrap_or_else(|| ":memory:".into());
    let store = if db == ":memory:" {
        CoreStore::in_memory()?
    } else {
        CoreStore::open(&db)?
    };
    store.migrate()?;
    Ok(store)
}

fn load_params(args: &[String]) -> Result<CoreParams> {
    match string_arg(args, "--params") {
        Some(path) => CoreParams::load(&path),
        None => Ok(CoreParams::default()),
    }
}

fn parse_window(args: &[String]) -> Result<Window> {
    let start = ts_arg(args, "--start")?;
    let end = ts_arg(args, "--end")?;
    Ok(Window::new(start, end))
}

fn ts_arg(args: &[String], flag: &str) -> Result<i64> {
    let raw = string_arg(args, flag).ok_or_else(|| anyhow!("{flag} <RFC3339 UTC> is required"))?;
    let dt: DateTime<Utc> = raw
        .parse()
        .map_err(|e| anyhow!("bad {flag} '{raw}': {e}"))?;
    Ok(dt.timestamp())
}

fn string_arg(args: &[String], flag: &str) -> Option<String> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].clone())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
