//! Organic timeline posts on a jittered schedule.

use super::{TickReport, Worker};
use crate::approval::{DraftApprovalQueue, PublishOutcome};
use crate::clock::Clock;
use crate::collaborators::{call_with_timeout, ContentGenerator};
use crate::config::TimelineConfig;
use crate::error::WorkerError;
use crate::settings::SettingsStore;
use async_trait::async_trait;
use herald_types::settings::flags;
use herald_types::{Draft, SkipReason, WorkerKind};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct TimelinePoster {
    settings: SettingsStore,
    queue: Arc<DraftApprovalQueue>,
    generator: Arc<dyn ContentGenerator>,
    clock: Arc<dyn Clock>,
    config: TimelineConfig,
    call_timeout: Duration,
}

impl TimelinePoster {
    pub fn new(
        settings: SettingsStore,
        queue: Arc<DraftApprovalQueue>,
        generator: Arc<dyn ContentGenerator>,
        clock: Arc<dyn Clock>,
        config: TimelineConfig,
        call_timeout: Duration,
    ) -> Self {
        Self {
            settings,
            queue,
            generator,
            clock,
            config,
            call_timeout,
        }
    }

    async fn draft_post(&self, approval_required: bool) -> Result<TickReport, WorkerError> {
        let text = call_with_timeout(self.call_timeout, self.generator.generate_timeline_post()).await?;
        let draft = self.queue.submit(Draft::timeline(text, self.clock.now())).await?;

        let mut report = TickReport::completed();
        report.count("drafted", 1);
        report.count("published", 0);

        if !approval_required && self.queue.can_publish() {
            match self.queue.publish(&draft.id).await? {
                PublishOutcome::Posted { .. } => report.count("published", 1),
                PublishOutcome::AlreadyHandled { .. } => {}
                PublishOutcome::Blocked { reason } => {
                    debug!(draft_id = %draft.id, reason = %reason, "Immediate publish blocked, draft left pending");
                }
            }
        }

        info!(draft_id = %draft.id, "Timeline draft created");
        Ok(report)
    }
}

/// `base` shifted by a uniform offset in `[-jitter, +jitter]`, never below
/// one second.
pub(crate) fn jittered(base: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return base;
    }
    let spread = jitter.as_secs() as i64;
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    let secs = (base.as_secs() as i64 + offset).max(1);
    Duration::from_secs(secs as u64)
}

#[async_trait]
impl Worker for TimelinePoster {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Timeline
    }

    fn interval(&self) -> Duration {
        jittered(
            Duration::from_secs(self.config.interval_secs),
            Duration::from_secs(self.config.jitter_secs),
        )
    }

    async fn run_once(&self) -> TickReport {
        let settings = match self.settings.current().await {
            Ok(settings) => settings,
            Err(e) => return TickReport::failed(e),
        };
        if !settings.flag(flags::TIMELINE) {
            return TickReport::disabled(format!("{} is off", flags::TIMELINE), false);
        }
        if settings.safe_mode {
            info!("Timeline post skipped (safe mode)");
            return TickReport::skipped(SkipReason::SafeMode);
        }

        match self.draft_post(settings.approval_required).await {
            Ok(report) => report,
            Err(e) if e.is_permanent() => TickReport::disabled(e.to_string(), true),
            Err(e) => TickReport::failed(e),
        }
    }
}
