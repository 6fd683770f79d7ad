//! Rolling-window rate limiter for outbound actions.
//!
//! Counts are timestamped events in shared storage, so every instance sees
//! the same totals. Windows roll continuously; there are no calendar
//! boundaries to burst across.
//!
//! Publishing takes a [`Reservation`] before the platform call: the storage
//! backend checks both caps and inserts the event in one step, so concurrent
//! publishers cannot overshoot. A failed call cancels its reservation.

use crate::clock::Clock;
use herald_storage::{CounterStore, RateCap, StorageResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Action class for anything that publishes to the platform.
pub const POST: &str = "post";

/// Hourly and daily caps for one action class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    #[serde(default = "default_hourly")]
    pub hourly: u64,

    #[serde(default = "default_daily")]
    pub daily: u64,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            hourly: default_hourly(),
            daily: default_daily(),
        }
    }
}

impl RateLimits {
    /// Whether one more action fits under both caps.
    pub fn admits(&self, hourly_used: u64, daily_used: u64) -> bool {
        hourly_used < self.hourly && daily_used < self.daily
    }
}

fn default_hourly() -> u64 {
    8
}

fn default_daily() -> u64 {
    40
}

/// Current consumption of one action class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateUsage {
    pub hourly_used: u64,
    pub hourly_limit: u64,
    pub daily_used: u64,
    pub daily_limit: u64,
}

/// A counted slot taken ahead of the action it pays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a reservation is either kept by acting or cancelled"]
pub struct Reservation {
    event_id: u64,
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    limits: RateLimits,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, limits: RateLimits) -> Self {
        Self {
            store,
            clock,
            limits,
        }
    }

    pub fn limits(&self) -> RateLimits {
        self.limits
    }

    /// Whether another action of `class` may happen now. Storage failures
    /// deny the action.
    pub async fn allow(&self, class: &str) -> bool {
        match self.usage(class).await {
            Ok(usage) => {
                let allowed = self.limits.admits(usage.hourly_used, usage.daily_used);
                if !allowed {
                    debug!(
                        class,
                        hourly_used = usage.hourly_used,
                        daily_used = usage.daily_used,
                        "Rate limit reached"
                    );
                }
                allowed
            }
            Err(e) => {
                warn!(class, error = %e, "Rate counters unavailable, denying action");
                false
            }
        }
    }

    /// Count one completed action and prune events older than the daily window.
    pub async fn record(&self, class: &str) -> StorageResult<()> {
        let now = self.clock.now();
        self.store.record_event(class, now).await?;
        self.prune(now).await;
        Ok(())
    }

    /// Take a slot under both caps, or `None` when either is full.
    pub async fn reserve(&self, class: &str) -> StorageResult<Option<Reservation>> {
        let now = self.clock.now();
        let caps = [
            RateCap {
                since: now - chrono::Duration::hours(1),
                max: self.limits.hourly,
            },
            RateCap {
                since: now - chrono::Duration::days(1),
                max: self.limits.daily,
            },
        ];
        let reserved = self.store.reserve_event(class, now, &caps).await?;
        match reserved {
            Some(event_id) => {
                self.prune(now).await;
                Ok(Some(Reservation { event_id }))
            }
            None => {
                debug!(class, "Rate limit reached");
                Ok(None)
            }
        }
    }

    /// Give a slot back after the action did not happen.
    pub async fn cancel(&self, reservation: Reservation) -> StorageResult<()> {
        if !self.store.cancel_event(reservation.event_id).await? {
            debug!(event_id = reservation.event_id, "Reservation already pruned");
        }
        Ok(())
    }

    async fn prune(&self, now: chrono::DateTime<chrono::Utc>) {
        match self.store.prune_events_before(now - chrono::Duration::days(1)).await {
            Ok(0) => {}
            Ok(pruned) => debug!(pruned, "Pruned expired rate events"),
            Err(e) => warn!(error = %e, "Failed to prune rate events"),
        }
    }

    pub async fn usage(&self, class: &str) -> StorageResult<RateUsage> {
        let now = self.clock.now();
        let hourly_used = self
            .store
            .count_events_since(class, now - chrono::Duration::hours(1))
            .await?;
        let daily_used = self
            .store
            .count_events_since(class, now - chrono::Duration::days(1))
            .await?;

        Ok(RateUsage {
            hourly_used,
            hourly_limit: self.limits.hourly,
            daily_used,
            daily_limit: self.limits.daily,
        })
    }
}
