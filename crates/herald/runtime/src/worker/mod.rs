//! Recurring workers and the loop that drives them.
//!
//! Each worker is one long-lived task. An iteration is `run_once`; between
//! iterations the runner waits on the injected clock, racing the shutdown
//! flag and the operator wake-up. Shutdown is only observed at the wait, so
//! an in-flight iteration always finishes.

mod ingestion;
mod learning;
mod publisher;
mod self_style;
mod timeline;

pub use ingestion::IngestionWorker;
pub use learning::LearningWorker;
pub use publisher::PublisherWorker;
pub use self_style::SelfStyleWorker;
pub use timeline::TimelinePoster;

use crate::clock::Clock;
use crate::status::WorkerRegistry;
use async_trait::async_trait;
use herald_types::{RunOutcome, SkipReason, WorkerKind};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// What one iteration did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub outcome: RunOutcome,
    pub counters: BTreeMap<String, u64>,
    /// Overrides the worker's interval before the next iteration
    pub next_delay: Option<Duration>,
}

impl TickReport {
    pub fn new(outcome: RunOutcome) -> Self {
        Self {
            outcome,
            counters: BTreeMap::new(),
            next_delay: None,
        }
    }

    pub fn completed() -> Self {
        Self::new(RunOutcome::Completed)
    }

    pub fn skipped(reason: SkipReason) -> Self {
        Self::new(RunOutcome::skipped(reason))
    }

    pub fn disabled(reason: impl Into<String>, requires_operator: bool) -> Self {
        Self::new(RunOutcome::Disabled {
            reason: reason.into(),
            requires_operator,
        })
    }

    pub fn failed(error: impl fmt::Display) -> Self {
        Self::new(RunOutcome::failed(error))
    }

    pub fn count(&mut self, name: &str, by: u64) {
        *self.counters.entry(name.to_string()).or_insert(0) += by;
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn with_counters(mut self, counters: BTreeMap<String, u64>) -> Self {
        self.counters = counters;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.next_delay = Some(delay);
        self
    }
}

#[async_trait]
pub trait Worker: Send + Sync {
    fn kind(&self) -> WorkerKind;

    /// Wait between iterations. Called once per iteration so implementations
    /// may add jitter.
    fn interval(&self) -> Duration;

    /// One unit of work. Failures are reported in the outcome, never raised.
    async fn run_once(&self) -> TickReport;
}

/// Drive `worker` until `shutdown` flips to true.
///
/// Suspended workers do not run but keep waiting, so an operator enable
/// resumes them without a restart.
pub async fn run_worker(
    worker: Arc<dyn Worker>,
    clock: Arc<dyn Clock>,
    registry: Arc<WorkerRegistry>,
    mut shutdown: watch::Receiver<bool>,
) {
    let kind = worker.kind();
    let waker = registry.waker(kind);
    info!(worker = %kind, "Worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let delay = if registry.is_runnable(kind) {
            let report = worker.run_once().await;
            registry.record(kind, &report, clock.now());
            log_outcome(kind, &report);
            report.next_delay.unwrap_or_else(|| worker.interval())
        } else {
            debug!(worker = %kind, "Worker suspended, waiting for operator");
            worker.interval()
        };

        tokio::select! {
            _ = clock.sleep(delay) => {}
            _ = waker.notified() => {
                debug!(worker = %kind, "Worker woken early");
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!(worker = %kind, "Worker stopped");
}

fn log_outcome(kind: WorkerKind, report: &TickReport) {
    match &report.outcome {
        RunOutcome::Completed => {
            debug!(worker = %kind, counters = ?report.counters, "Iteration completed")
        }
        RunOutcome::Skipped { reason } => info!(worker = %kind, "Iteration skipped ({})", reason),
        RunOutcome::Disabled { reason, .. } => {
            debug!(worker = %kind, reason = %reason, "Worker disabled")
        }
        RunOutcome::Failed { error } => warn!(worker = %kind, error = %error, "Iteration failed"),
    }
}
