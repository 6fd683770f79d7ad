//! Learning extraction.
//!
//! Selects unlearned inbox and outbound rows oldest first, extracts memory
//! candidates and stores them, then claims the row. A row is claimed only
//! after its memories are stored, so a crash in between re-extracts it on
//! the next run. Duplicate memories from that are accepted.
//!
//! A row whose extraction fails transiently cools down before its next
//! attempt, so older failing rows never crowd healthy ones out of the batch.
//! After `max_attempts` failures the row is claimed without memories.
//! Failure history lives in this process only; a restart grants every row
//! a fresh set of attempts.

use super::{TickReport, Worker};
use crate::clock::Clock;
use crate::collaborators::{call_with_timeout, Extractor, LearningRow};
use crate::config::LearningConfig;
use crate::error::WorkerError;
use crate::settings::SettingsStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use herald_storage::{HeraldStorage, InboxStore, MemoryStore, OutboundStore};
use herald_types::settings::flags;
use herald_types::{Memory, SkipReason, WorkerKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
struct RowFailure {
    attempts: u32,
    last_failure: DateTime<Utc>,
}

fn row_key(row: &LearningRow) -> String {
    match row {
        LearningRow::Inbox(item) => format!("inbox:{}:{}", item.source, item.external_id),
        LearningRow::Outbound(post) => format!("outbound:{}", post.id),
    }
}

pub struct LearningWorker {
    storage: Arc<dyn HeraldStorage>,
    settings: SettingsStore,
    extractor: Arc<dyn Extractor>,
    clock: Arc<dyn Clock>,
    config: LearningConfig,
    call_timeout: Duration,
    failures: DashMap<String, RowFailure>,
}

impl LearningWorker {
    pub fn new(
        storage: Arc<dyn HeraldStorage>,
        settings: SettingsStore,
        extractor: Arc<dyn Extractor>,
        clock: Arc<dyn Clock>,
        config: LearningConfig,
        call_timeout: Duration,
    ) -> Self {
        Self {
            storage,
            settings,
            extractor,
            clock,
            config,
            call_timeout,
            failures: DashMap::new(),
        }
    }

    /// Whether a previously failed row is still waiting out its retry delay.
    fn cooling_down(&self, key: &str, now: DateTime<Utc>) -> bool {
        let Some(failure) = self.failures.get(key).map(|f| *f) else {
            return false;
        };
        let exponent = failure.attempts.saturating_sub(1).min(16);
        let wait = self.config.retry_base_secs.saturating_mul(1u64 << exponent);
        let wait = chrono::Duration::seconds(i64::try_from(wait).unwrap_or(i64::MAX / 1000));
        now < failure.last_failure + wait
    }

    /// Count a failure and return the row's attempts so far.
    fn note_failure(&self, key: String, now: DateTime<Utc>) -> u32 {
        let mut entry = self.failures.entry(key).or_insert(RowFailure {
            attempts: 0,
            last_failure: now,
        });
        entry.attempts += 1;
        entry.last_failure = now;
        entry.attempts
    }

    /// Up to `batch_size` unlearned rows across both tables, oldest first,
    /// skipping rows that are cooling down after a failure.
    async fn select_rows(&self) -> Result<Vec<LearningRow>, WorkerError> {
        let limit = self.config.batch_size;
        let now = self.clock.now();
        // Over-fetch by the number of tracked rows so cooling ones cannot fill the page.
        let fetch = limit.saturating_add(self.failures.len());
        let mut rows: Vec<LearningRow> = self
            .storage
            .list_unlearned_inbox(fetch)
            .await?
            .into_iter()
            .map(LearningRow::Inbox)
            .collect();
        rows.extend(
            self.storage
                .list_unlearned_outbound(fetch)
                .await?
                .into_iter()
                .map(LearningRow::Outbound),
        );
        rows.retain(|row| !self.cooling_down(&row_key(row), now));
        rows.sort_by_key(LearningRow::seen_at);
        rows.truncate(limit);
        Ok(rows)
    }

    /// Store the row's memories, then claim it. Returns the number of
    /// memories written and whether this call won the claim.
    async fn learn_row(&self, row: &LearningRow) -> Result<(u64, bool), WorkerError> {
        let candidates = call_with_timeout(self.call_timeout, self.extractor.extract(row)).await?;
        let source_id = row.source_id();
        let now = self.clock.now();

        let mut written = 0;
        for candidate in candidates {
            self.storage
                .insert_memory(Memory::from_candidate(candidate, &source_id, now))
                .await?;
            written += 1;
        }

        let claimed = self.claim(row, now).await?;
        Ok((written, claimed))
    }

    async fn claim(&self, row: &LearningRow, now: DateTime<Utc>) -> Result<bool, WorkerError> {
        let claimed = match row {
            LearningRow::Inbox(item) => {
                self.storage
                    .claim_inbox_learning(&item.source, &item.external_id, now)
                    .await?
            }
            LearningRow::Outbound(post) => self.storage.claim_outbound_learning(&post.id, now).await?,
        };
        Ok(claimed)
    }
}

#[async_trait]
impl Worker for LearningWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Learning
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.config.interval_secs)
    }

    async fn run_once(&self) -> TickReport {
        let settings = match self.settings.current().await {
            Ok(settings) => settings,
            Err(e) => return TickReport::failed(e),
        };
        if !settings.flag(flags::LEARNING) {
            return TickReport::disabled(format!("{} is off", flags::LEARNING), false);
        }

        let rows = match self.select_rows().await {
            Ok(rows) => rows,
            Err(e) => return TickReport::failed(e),
        };
        if rows.is_empty() {
            return TickReport::skipped(SkipReason::NothingToDo);
        }

        let mut report = TickReport::completed();
        report.count("processed", 0);
        report.count("memories", 0);
        report.count("errors", 0);
        report.count("abandoned", 0);

        for row in &rows {
            let key = row_key(row);
            match self.learn_row(row).await {
                Ok((written, claimed)) => {
                    self.failures.remove(&key);
                    report.count("memories", written);
                    if claimed {
                        report.count("processed", 1);
                    } else {
                        debug!(row_id = %row.source_id(), "Row already learned by another worker");
                    }
                }
                Err(e) if e.is_permanent() => {
                    return TickReport::disabled(format!("extraction failed: {}", e), true)
                        .with_counters(report.counters);
                }
                Err(e) => {
                    report.count("errors", 1);
                    let now = self.clock.now();
                    let attempts = self.note_failure(key.clone(), now);
                    if attempts < self.config.max_attempts {
                        warn!(row_id = %row.source_id(), attempts, error = %e, "Learning failed for row");
                        continue;
                    }

                    warn!(
                        row_id = %row.source_id(),
                        attempts,
                        error = %e,
                        "Giving up on row, marking it learned without memories"
                    );
                    match self.claim(row, now).await {
                        Ok(_) => {
                            self.failures.remove(&key);
                            report.count("abandoned", 1);
                        }
                        Err(claim_err) => {
                            warn!(row_id = %row.source_id(), error = %claim_err, "Failed to retire row");
                        }
                    }
                }
            }
        }

        info!(
            processed = report.counter("processed"),
            memories = report.counter("memories"),
            errors = report.counter("errors"),
            abandoned = report.counter("abandoned"),
            "Learning batch finished"
        );
        report
    }
}
