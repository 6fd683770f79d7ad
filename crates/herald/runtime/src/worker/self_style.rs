//! Style proposals from the persona's own posts.
//!
//! Leader-gated: only the instance holding the lease generates. A proposal
//! is always written inactive; activation is a separate operator action.

use super::{TickReport, Worker};
use crate::clock::Clock;
use crate::collaborators::{call_with_timeout, Analyzer};
use crate::config::SelfStyleConfig;
use crate::error::WorkerError;
use crate::leader::{Lease, LeaderLock};
use crate::settings::SettingsStore;
use async_trait::async_trait;
use herald_storage::{HeraldStorage, OutboundStore, StyleStore};
use herald_types::settings::flags;
use herald_types::{SkipReason, StyleVersion, WorkerKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct SelfStyleWorker {
    storage: Arc<dyn HeraldStorage>,
    settings: SettingsStore,
    lock: Option<LeaderLock>,
    analyzer: Arc<dyn Analyzer>,
    clock: Arc<dyn Clock>,
    config: SelfStyleConfig,
    call_timeout: Duration,
}

impl SelfStyleWorker {
    pub fn new(
        storage: Arc<dyn HeraldStorage>,
        settings: SettingsStore,
        lock: Option<LeaderLock>,
        analyzer: Arc<dyn Analyzer>,
        clock: Arc<dyn Clock>,
        config: SelfStyleConfig,
        call_timeout: Duration,
    ) -> Self {
        Self {
            storage,
            settings,
            lock,
            analyzer,
            clock,
            config,
            call_timeout,
        }
    }

    async fn generate(&self, lock: &LeaderLock, lease: Lease) -> TickReport {
        let guard = lock.keep_alive(lease);
        let report = match self.propose().await {
            Ok(report) => report,
            Err(e) if e.is_permanent() => TickReport::disabled(format!("analysis failed: {}", e), true),
            Err(e) => TickReport::failed(e),
        };

        if guard.is_lost() {
            warn!(key = %self.config.lock_key, "Lease lost during style generation");
        }
        if let Err(e) = guard.release().await {
            warn!(key = %self.config.lock_key, error = %e, "Failed to release lease, it will lapse");
        }
        report
    }

    async fn propose(&self) -> Result<TickReport, WorkerError> {
        let sample = self.config.sample_size.max(self.config.min_posts);
        let posts = self.storage.list_recent_posted(sample).await?;

        let mut report = TickReport::completed();
        report.count("sampled", posts.len() as u64);
        if posts.len() < self.config.min_posts {
            info!(
                posts = posts.len(),
                min_posts = self.config.min_posts,
                "Style generation skipped (insufficient data)"
            );
            return Ok(TickReport::skipped(SkipReason::InsufficientData).with_counters(report.counters));
        }

        let payload =
            call_with_timeout(self.call_timeout, self.analyzer.build_style_version(&posts)).await?;
        let version = StyleVersion::proposal(payload, posts.len() as u32, self.clock.now());
        self.storage.insert_style_version(version.clone()).await?;

        info!(version = %version.id, source_count = version.source_count, "Style version proposed");
        report.count("proposed", 1);
        Ok(report)
    }
}

#[async_trait]
impl Worker for SelfStyleWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::SelfStyle
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.config.interval_secs)
    }

    async fn run_once(&self) -> TickReport {
        let settings = match self.settings.current().await {
            Ok(settings) => settings,
            Err(e) => return TickReport::failed(e),
        };
        if !settings.flag(flags::SELF_STYLE) {
            return TickReport::disabled(format!("{} is off", flags::SELF_STYLE), false);
        }

        let Some(lock) = &self.lock else {
            return TickReport::disabled("no leader lock backend configured", true);
        };

        match lock.try_acquire(&self.config.lock_key, self.config.lock_ttl()).await {
            Ok(Some(lease)) => self.generate(lock, lease).await,
            Ok(None) => TickReport::skipped(SkipReason::LockContention),
            Err(e) => TickReport::failed(e),
        }
    }
}
