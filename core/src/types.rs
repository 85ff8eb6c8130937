//! Shared primitive types used across the entire core.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Row id of a user in `users`.
pub type UserId = i64;

/// Row id of a video in `videos`.
pub type VideoId = i64;

/// Money. Always integer cents, never floats.
pub type Cents = i64;

/// UTC unix seconds. All storage timestamps use this; `chrono` types
/// exist only at the operator surface.
pub type UnixTs = i64;

/// Half-open window `[start, end)` in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: UnixTs,
    pub end: UnixTs,
}

impl Window {
    pub fn new(start: UnixTs, end: UnixTs) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: UnixTs) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn len_s(&self) -> i64 {
        self.end - self.start
    }
}

/// Cooperative cancellation flag shared with the caller.
///
/// Entrypoints check it before each side-effecting stage. Once the
/// revenue window row is committed the run is final and the flag is
/// ignored.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
