//! Integrity & revenue allocation core for short-video creator payouts.
//!
//! Two pipelines over one relational store:
//!
//!   events ─► window_reader ─► features ─► scoring ─► video_aggregates
//!                                                     (analyzer drives this)
//!   aggregates + events ─► unit_builder ─► allocator ─► transactions
//!                                                       (finalizer drives this)
//!
//! RULES:
//!   - Only the store talks to the database.
//!   - Every entrypoint takes an explicit CoreParams; no globals.
//!   - Given the same rows and params, every output is bit-identical.
//!   - Ledger rows are append-only; the only deletes are the
//!     finalizer's compensating deletes of rows it just wrote.

pub mod allocator;
pub mod analyzer;
pub mod config;
pub mod error;
pub mod features;
pub mod finalizer;
pub mod retry;
pub mod scoring;
pub mod store;
pub mod trust;
pub mod types;
pub mod unit_builder;
pub mod window_reader;

pub use allocator::{allocate, AllocationOutcome, Exclusion};
pub use analyzer::analyze_window;
pub use config::CoreParams;
pub use error::{CoreError, CoreResult};
pub use finalizer::{finalize_revenue_window, RevenueWindowSummary, WindowAccounting};
pub use scoring::EisDetails;
pub use store::CoreStore;
pub use types::{CancelToken, Cents, UnixTs, UserId, VideoId, Window};
pub use unit_builder::compute_units;
