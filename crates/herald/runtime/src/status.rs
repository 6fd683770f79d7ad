//! Per-worker status registry surfaced to operators.
//!
//! Distinguishes workers that are intentionally off, blocked on a missing
//! dependency, suspended after a permanent failure, or running but failing.

use crate::error::WorkerError;
use crate::worker::TickReport;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use herald_types::{RunOutcome, WorkerKind, WorkerStatus};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info};

#[derive(Default)]
pub struct WorkerRegistry {
    statuses: DashMap<WorkerKind, WorkerStatus>,
    /// Workers never spawned because a dependency is missing
    unconfigured: DashMap<WorkerKind, String>,
    wakers: DashMap<WorkerKind, Arc<Notify>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: WorkerKind) {
        self.statuses.insert(kind, WorkerStatus::new(kind));
        self.unconfigured.remove(&kind);
    }

    /// Record a worker that will not run because it lacks a dependency.
    pub fn register_unconfigured(&self, kind: WorkerKind, reason: impl Into<String>) {
        let reason = reason.into();
        let mut status = WorkerStatus::new(kind);
        status.enabled = false;
        status.disabled_reason = Some(reason.clone());
        self.statuses.insert(kind, status);
        self.unconfigured.insert(kind, reason);
    }

    /// Whether the runner should tick this worker now.
    pub fn is_runnable(&self, kind: WorkerKind) -> bool {
        self.statuses
            .get(&kind)
            .map(|status| !status.suspended && !self.unconfigured.contains_key(&kind))
            .unwrap_or(false)
    }

    /// Fold one iteration's report into the worker's status.
    pub fn record(&self, kind: WorkerKind, report: &TickReport, at: DateTime<Utc>) {
        let mut status = self
            .statuses
            .entry(kind)
            .or_insert_with(|| WorkerStatus::new(kind));

        status.run_count += 1;
        status.last_run_at = Some(at);
        status.last_outcome = Some(report.outcome.clone());
        for (name, value) in &report.counters {
            *status.counters.entry(name.clone()).or_insert(0) += value;
        }

        match &report.outcome {
            RunOutcome::Completed => {
                status.enabled = true;
                status.disabled_reason = None;
                status.last_success_at = Some(at);
            }
            RunOutcome::Skipped { .. } => {
                status.enabled = true;
                status.disabled_reason = None;
            }
            RunOutcome::Disabled {
                reason,
                requires_operator,
            } => {
                status.enabled = false;
                status.disabled_reason = Some(reason.clone());
                if *requires_operator && !status.suspended {
                    status.suspended = true;
                    error!(worker = %kind, reason = %reason, "Worker suspended until re-enabled by an operator");
                }
            }
            RunOutcome::Failed { error } => {
                status.error_count += 1;
                status.last_error = Some(error.clone());
            }
        }
    }

    /// Clear a suspension and wake the worker.
    pub fn enable(&self, kind: WorkerKind) -> Result<WorkerStatus, WorkerError> {
        if let Some(reason) = self.unconfigured.get(&kind) {
            return Err(WorkerError::NotConfigured {
                kind,
                reason: reason.clone(),
            });
        }

        let snapshot = {
            let mut status = self
                .statuses
                .get_mut(&kind)
                .ok_or_else(|| WorkerError::UnknownWorker(kind.to_string()))?;
            status.suspended = false;
            status.enabled = true;
            status.disabled_reason = None;
            status.clone()
        };

        info!(worker = %kind, "Worker re-enabled by operator");
        self.waker(kind).notify_one();
        Ok(snapshot)
    }

    pub fn get(&self, kind: WorkerKind) -> Option<WorkerStatus> {
        self.statuses.get(&kind).map(|status| status.clone())
    }

    /// All known workers in a stable order.
    pub fn snapshot(&self) -> Vec<WorkerStatus> {
        let mut all: Vec<WorkerStatus> = self.statuses.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|status| status.kind);
        all
    }

    pub(crate) fn waker(&self, kind: WorkerKind) -> Arc<Notify> {
        self.wakers
            .entry(kind)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }
}
