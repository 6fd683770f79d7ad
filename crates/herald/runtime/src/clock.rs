//! Time source used by every worker.
//!
//! Workers never read the wall clock directly. [`SystemClock`] is used in
//! production; [`ManualClock`] only moves when told to, so scheduling logic
//! can be tested without real waiting.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Pluggable time and sleep source.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Resolve once `now() >= deadline`.
    async fn sleep_until(&self, deadline: DateTime<Utc>);

    async fn sleep(&self, duration: Duration) {
        match chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| self.now().checked_add_signed(d))
        {
            Some(deadline) => self.sleep_until(deadline).await,
            None => futures::future::pending::<()>().await,
        }
    }
}

/// Wall clock backed by tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        if let Ok(remaining) = (deadline - Utc::now()).to_std() {
            tokio::time::sleep(remaining).await;
        }
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Test clock advanced explicitly with [`ManualClock::advance`].
///
/// Sleepers wake as soon as the clock reaches their deadline.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<watch::Sender<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        let (tx, _rx) = watch::channel(start);
        Self { now: Arc::new(tx) }
    }

    pub fn advance(&self, by: Duration) {
        let step = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        self.now.send_modify(|now| *now += step);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.now.send_replace(at);
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.borrow()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let mut rx = self.now.subscribe();
        loop {
            if *rx.borrow_and_update() >= deadline {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn manual_clock_wakes_sleepers_on_advance() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);

        let sleeper = {
            let clock = clock.clone();
            let deadline = start + chrono::Duration::hours(3);
            tokio::spawn(async move { clock.sleep_until(deadline).await })
        };

        tokio::task::yield_now().await;
        clock.advance(Duration::from_secs(3600));
        tokio::task::yield_now().await;
        assert!(!sleeper.is_finished());

        clock.advance(Duration::from_secs(2 * 3600));
        sleeper.await.unwrap();
        assert_eq!(clock.now(), start + chrono::Duration::hours(3));
    }

    #[tokio::test]
    async fn manual_clock_past_deadline_returns_immediately() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.sleep_until(start - chrono::Duration::seconds(1)).await;
        clock.sleep(Duration::ZERO).await;
    }
}
