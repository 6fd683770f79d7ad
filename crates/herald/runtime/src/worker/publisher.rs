//! Publisher sweep.
//!
//! Publishes eligible drafts oldest first through the approval queue. This
//! is how an approved draft goes out once safe mode is switched off.
//! Transient platform failures end the sweep and back off exponentially
//! until a publish succeeds.

use super::{TickReport, Worker};
use crate::approval::{DraftApprovalQueue, PublishOutcome};
use crate::backoff::Backoff;
use crate::config::PublisherConfig;
use crate::error::ApprovalError;
use crate::settings::SettingsStore;
use async_trait::async_trait;
use herald_types::{SkipReason, WorkerKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct PublisherWorker {
    settings: SettingsStore,
    queue: Arc<DraftApprovalQueue>,
    config: PublisherConfig,
    backoff: Backoff,
}

impl PublisherWorker {
    pub fn new(settings: SettingsStore, queue: Arc<DraftApprovalQueue>, config: PublisherConfig) -> Self {
        let backoff = Backoff::new(
            Duration::from_secs(config.backoff_base_secs),
            Duration::from_secs(config.backoff_max_secs),
        );
        Self {
            settings,
            queue,
            config,
            backoff,
        }
    }
}

#[async_trait]
impl Worker for PublisherWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Publisher
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.config.interval_secs)
    }

    async fn run_once(&self) -> TickReport {
        match self.settings.current().await {
            Ok(settings) if settings.safe_mode => {
                debug!("Publisher sweep skipped (safe mode)");
                return TickReport::skipped(SkipReason::SafeMode);
            }
            Ok(_) => {}
            Err(e) => return TickReport::failed(e),
        }

        let drafts = match self.queue.publishable(self.config.batch_size).await {
            Ok(drafts) => drafts,
            Err(e) => return TickReport::failed(e),
        };
        if drafts.is_empty() {
            return TickReport::skipped(SkipReason::NothingToDo);
        }

        let mut report = TickReport::completed();
        report.count("published", 0);
        report.count("already_handled", 0);
        report.count("errors", 0);

        for draft in &drafts {
            match self.queue.publish(&draft.id).await {
                Ok(PublishOutcome::Posted { .. }) => {
                    self.backoff.reset();
                    report.count("published", 1);
                }
                Ok(PublishOutcome::AlreadyHandled { .. }) => report.count("already_handled", 1),
                Ok(PublishOutcome::Blocked { reason }) => {
                    info!(reason = %reason, "Publisher sweep stopped by safety gate");
                    return match reason.as_skip() {
                        Some(skip) if report.counter("published") == 0 => {
                            TickReport::skipped(skip).with_counters(report.counters)
                        }
                        _ => report,
                    };
                }
                Err(ApprovalError::AlreadyFinalized { id, status }) => {
                    debug!(draft_id = %id, status = %status, "Draft finalized concurrently");
                }
                Err(ApprovalError::PublishInProgress(id)) => {
                    debug!(draft_id = %id, "Draft is being published by another attempt");
                }
                Err(ApprovalError::ApprovalRequired(id)) => {
                    debug!(draft_id = %id, "Approval became required, draft left pending");
                }
                Err(ApprovalError::Publish(e)) if e.is_permanent() => {
                    return TickReport::disabled(format!("publish failed: {}", e), true)
                        .with_counters(report.counters);
                }
                Err(ApprovalError::Publish(e)) if e.is_transient() => {
                    let delay = self.backoff.on_failure();
                    warn!(
                        draft_id = %draft.id,
                        error = %e,
                        failures = self.backoff.consecutive_failures(),
                        retry_in = ?delay,
                        "Publish failed, backing off"
                    );
                    report.count("errors", 1);
                    return report.with_delay(delay);
                }
                Err(e) => {
                    warn!(draft_id = %draft.id, error = %e, "Publish failed, retrying next sweep");
                    report.count("errors", 1);
                    break;
                }
            }
        }
        report
    }
}
