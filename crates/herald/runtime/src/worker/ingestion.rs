//! Platform ingestion.
//!
//! Polls the platform from the durable cursor, deduplicates, scores, stores
//! and drafts a reply per item. Per-item failures are isolated; poll
//! failures back off exponentially.
//!
//! An item stored without a drafted reply stays unprocessed. Each
//! successful poll first retries up to `resume_batch_size` such items,
//! oldest first, and closes an item without a reply once it has failed
//! `max_item_attempts` retries. Retry counts live in this process only.

use super::{TickReport, Worker};
use crate::approval::{DraftApprovalQueue, PublishOutcome};
use crate::backoff::Backoff;
use crate::clock::Clock;
use crate::collaborators::{call_with_timeout, ContentGenerator, Platform, Scorer};
use crate::config::IngestionConfig;
use crate::error::WorkerError;
use crate::settings::SettingsStore;
use async_trait::async_trait;
use dashmap::DashMap;
use herald_storage::{CursorStore, HeraldStorage, InboxStore, ThreadStore};
use herald_types::settings::flags;
use herald_types::{Draft, ExternalId, InboxItem, RawItem, RuntimeSettings, WorkerKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct IngestionWorker {
    storage: Arc<dyn HeraldStorage>,
    settings: SettingsStore,
    queue: Arc<DraftApprovalQueue>,
    platform: Arc<dyn Platform>,
    generator: Arc<dyn ContentGenerator>,
    scorer: Arc<dyn Scorer>,
    clock: Arc<dyn Clock>,
    config: IngestionConfig,
    call_timeout: Duration,
    backoff: Backoff,
    retries: DashMap<ExternalId, u32>,
}

impl IngestionWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<dyn HeraldStorage>,
        settings: SettingsStore,
        queue: Arc<DraftApprovalQueue>,
        platform: Arc<dyn Platform>,
        generator: Arc<dyn ContentGenerator>,
        scorer: Arc<dyn Scorer>,
        clock: Arc<dyn Clock>,
        config: IngestionConfig,
        call_timeout: Duration,
    ) -> Self {
        let backoff = Backoff::new(
            Duration::from_secs(config.backoff_base_secs),
            Duration::from_secs(config.backoff_max_secs),
        );
        Self {
            storage,
            settings,
            queue,
            platform,
            generator,
            scorer,
            clock,
            config,
            call_timeout,
            backoff,
            retries: DashMap::new(),
        }
    }

    async fn poll_and_process(&self, settings: &RuntimeSettings) -> TickReport {
        let source = self.config.source.as_str();
        let cursor = match self.storage.get_cursor(source).await {
            Ok(cursor) => cursor,
            Err(e) => return TickReport::failed(e),
        };

        let batch = match call_with_timeout(self.call_timeout, self.platform.poll(cursor.as_deref()))
            .await
        {
            Ok(batch) => {
                self.backoff.reset();
                batch
            }
            Err(e) if e.is_permanent() => {
                return TickReport::disabled(format!("platform poll failed: {}", e), true);
            }
            Err(e) => {
                let delay = self.backoff.on_failure();
                warn!(
                    source,
                    error = %e,
                    failures = self.backoff.consecutive_failures(),
                    retry_in = ?delay,
                    "Poll failed, backing off"
                );
                return TickReport::failed(e).with_delay(delay);
            }
        };

        let mut report = TickReport::completed();
        for name in [
            "fetched",
            "stored",
            "duplicates",
            "filtered",
            "drafted",
            "published",
            "thread_stopped",
            "errors",
            "resumed",
            "abandoned",
        ] {
            report.count(name, 0);
        }

        if let Err(e) = self.resume_unprocessed(settings, &mut report).await {
            if e.is_permanent() {
                return TickReport::disabled(format!("resume failed: {}", e), true)
                    .with_counters(report.counters);
            }
            warn!(source, error = %e, "Failed to resume unprocessed items");
            report.count("errors", 1);
        }

        for raw in &batch.items {
            report.count("fetched", 1);
            if let Err(e) = self.process_item(raw, settings, &mut report).await {
                let key = raw.dedup_key();
                if e.is_permanent() {
                    return TickReport::disabled(format!("item {} failed: {}", key, e), true)
                        .with_counters(report.counters);
                }
                warn!(source, external_id = %key, error = %e, "Failed to process item");
                report.count("errors", 1);
            }
        }

        if let Some(next) = &batch.next_cursor {
            if let Err(e) = self.storage.set_cursor(source, next, self.clock.now()).await {
                return TickReport::failed(e).with_counters(report.counters);
            }
        }

        if !batch.items.is_empty() {
            info!(
                source,
                fetched = report.counter("fetched"),
                stored = report.counter("stored"),
                duplicates = report.counter("duplicates"),
                filtered = report.counter("filtered"),
                drafted = report.counter("drafted"),
                "Poll processed"
            );
        }
        report
    }

    async fn process_item(
        &self,
        raw: &RawItem,
        settings: &RuntimeSettings,
        report: &mut TickReport,
    ) -> Result<(), WorkerError> {
        let source = self.config.source.as_str();
        let key = raw.dedup_key();

        if self.storage.inbox_exists(source, &key).await? {
            debug!(source, external_id = %key, "Duplicate item skipped");
            report.count("duplicates", 1);
            return Ok(());
        }

        let score = call_with_timeout(self.call_timeout, self.scorer.score(raw)).await?;
        if score < self.config.score_threshold {
            debug!(source, external_id = %key, score, "Item below score threshold");
            report.count("filtered", 1);
            return Ok(());
        }

        let item = InboxItem::from_raw(source, raw, score, self.clock.now());
        if !self.storage.insert_inbox(item.clone()).await? {
            report.count("duplicates", 1);
            return Ok(());
        }
        report.count("stored", 1);

        self.reply_to(&item, settings, report).await
    }

    /// Retry stored items whose reply was never drafted. Per-item failures
    /// are counted here; permanent collaborator errors and storage errors escape.
    async fn resume_unprocessed(
        &self,
        settings: &RuntimeSettings,
        report: &mut TickReport,
    ) -> Result<(), WorkerError> {
        let source = self.config.source.as_str();
        let items = self
            .storage
            .list_unprocessed_inbox(source, self.config.resume_batch_size)
            .await?;

        for item in &items {
            report.count("resumed", 1);
            let key = &item.external_id;
            let err = match self.reply_to(item, settings, report).await {
                Ok(()) => {
                    self.retries.remove(key);
                    continue;
                }
                Err(e) if e.is_permanent() => return Err(e),
                Err(e) => e,
            };

            report.count("errors", 1);
            let attempts = {
                let mut entry = self.retries.entry(key.clone()).or_insert(0);
                *entry += 1;
                *entry
            };
            if attempts < self.config.max_item_attempts {
                warn!(source, external_id = %key, attempts, error = %err, "Retry of unprocessed item failed");
                continue;
            }

            warn!(source, external_id = %key, attempts, error = %err, "Giving up on item, closing it without a reply");
            self.storage.mark_inbox_processed(source, key).await?;
            self.retries.remove(key);
            report.count("abandoned", 1);
        }
        Ok(())
    }

    /// Draft (and maybe publish) the reply to a stored item, then mark it processed.
    async fn reply_to(
        &self,
        item: &InboxItem,
        settings: &RuntimeSettings,
        report: &mut TickReport,
    ) -> Result<(), WorkerError> {
        let source = self.config.source.as_str();
        let key = &item.external_id;

        if let Some(conversation_id) = &item.conversation_id {
            let stopped = self
                .storage
                .get_thread(conversation_id)
                .await?
                .map(|thread| thread.stopped)
                .unwrap_or(false);
            if stopped {
                debug!(source, external_id = %key, conversation_id = %conversation_id, "Thread stopped, no reply drafted");
                self.storage.mark_inbox_processed(source, key).await?;
                report.count("thread_stopped", 1);
                return Ok(());
            }
        }

        let text = call_with_timeout(self.call_timeout, self.generator.generate_reply(item)).await?;
        let draft = Draft::reply(
            text,
            item.external_id.clone(),
            item.conversation_id.clone(),
            self.clock.now(),
        );
        let draft = self.queue.submit(draft).await?;
        self.storage.mark_inbox_processed(source, key).await?;
        report.count("drafted", 1);

        if !settings.approval_required && self.queue.can_publish() {
            match self.queue.publish(&draft.id).await? {
                PublishOutcome::Posted { .. } => report.count("published", 1),
                PublishOutcome::AlreadyHandled { winner, .. } => {
                    debug!(draft_id = %draft.id, winner = %winner, "Reply already handled");
                }
                PublishOutcome::Blocked { reason } => {
                    debug!(draft_id = %draft.id, reason = %reason, "Immediate publish blocked, draft left pending");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Worker for IngestionWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Ingestion
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.config.interval_secs)
    }

    async fn run_once(&self) -> TickReport {
        let settings = match self.settings.current().await {
            Ok(settings) => settings,
            Err(e) => return TickReport::failed(e),
        };
        if !settings.flag(flags::INGESTION) {
            return TickReport::disabled(format!("{} is off", flags::INGESTION), false);
        }

        self.poll_and_process(&settings).await
    }
}
