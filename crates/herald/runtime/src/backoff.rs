//! Exponential backoff for failing platform calls.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Doubles the delay on each consecutive failure, capped at `max`.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: AtomicU32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: AtomicU32::new(0),
        }
    }

    /// Register a failure and return the delay before the next attempt.
    pub fn on_failure(&self) -> Duration {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        let exponent = failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    pub fn reset(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }
}
