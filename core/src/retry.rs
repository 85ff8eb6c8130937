//! Retry with exponential backoff for operator entrypoints.
//!
//! Only errors classified transient by `CoreError::is_transient` are
//! retried, and only at the outermost surface: inner stages fail fast so
//! a retry re-runs the whole idempotent operation.

use crate::error::{CoreError, CoreResult};
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms: base_delay_ms.saturating_mul(32),
        }
    }

    /// Delay before the given retry attempt (1-based), doubled each time
    /// and jittered ±25% so concurrent callers don't stampede the store.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << (attempt - 1).min(16))
            .min(self.max_delay_ms);
        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_millis((exp as f64 * jitter) as u64)
    }

    /// Run `op`, retrying transient failures up to `max_attempts` times.
    pub fn run<T>(&self, label: &str, mut op: impl FnMut() -> CoreResult<T>) -> CoreResult<T> {
        let mut attempt = 0u32;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    attempt += 1;
                    let delay = self.delay_for_attempt(attempt);
                    log::warn!(
                        "{label}: transient storage error (attempt {attempt}/{}): {e}; \
                         retrying in {delay:?}",
                        self.max_attempts
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => {
                    if e.is_schema() {
                        return Err(CoreError::Schema(e.to_string()));
                    }
                    return Err(e);
                }
            }
        }
    }
}
