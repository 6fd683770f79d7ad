//! Orchestrator facade.
//!
//! Wires storage, collaborators and configuration into the shared services
//! and the five workers, runs them, and exposes the operations the admin
//! surface needs.

use crate::approval::{ApprovalResult, DraftApprovalQueue, PublishOutcome, QueueConfig};
use crate::clock::{Clock, SystemClock};
use crate::collaborators::{Analyzer, ContentGenerator, Extractor, Platform, Scorer};
use crate::config::RuntimeConfig;
use crate::error::{ApprovalError, WorkerError};
use crate::leader::LeaderLock;
use crate::rate_limit::{RateLimiter, RateUsage, POST};
use crate::safety::SafetyGate;
use crate::settings::SettingsStore;
use crate::status::WorkerRegistry;
use crate::style::StyleManager;
use crate::worker::{
    run_worker, IngestionWorker, LearningWorker, PublisherWorker, SelfStyleWorker, TickReport,
    TimelinePoster, Worker,
};
use chrono::{DateTime, Utc};
use herald_storage::{
    DraftCounts, DraftStore, HeraldStorage, InboxCounts, InboxStore, LeaseRecord, MemoryStore,
    OutboundStore, QueryWindow, ReplyLogStore, StorageResult, StyleStore, ThreadStore,
};
use herald_types::{
    Draft, DraftId, HolderId, Memory, MemoryKind, RuntimeSettings, SettingsPatch, StyleVersion,
    Thread, WorkerKind, WorkerStatus,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// External collaborators. Any may be absent; workers that need a missing
/// one are registered as not configured instead of being spawned.
#[derive(Default, Clone)]
pub struct Collaborators {
    pub platform: Option<Arc<dyn Platform>>,
    pub generator: Option<Arc<dyn ContentGenerator>>,
    pub scorer: Option<Arc<dyn Scorer>>,
    pub extractor: Option<Arc<dyn Extractor>>,
    pub analyzer: Option<Arc<dyn Analyzer>>,
}

/// Operator-facing snapshot of the whole runtime
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    pub instance: HolderId,
    pub settings: RuntimeSettings,
    pub inbox: InboxCounts,
    pub drafts: DraftCounts,
    pub outbound_posts: u64,
    pub replies: u64,
    pub memories: u64,
    pub stopped_threads: u64,
    pub active_style: Option<StyleVersion>,
    pub rate: RateUsage,
    /// Self-style lease, when a lock backend is configured
    pub lock: Option<LeaseRecord>,
    pub workers: Vec<WorkerStatus>,
}

/// Result of an operator approval.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalReceipt {
    pub draft: Draft,
    /// Outcome of the publish attempt that follows approval, if one was made
    pub publish: Option<PublishOutcome>,
    /// Set when the publish attempt failed; the draft stays approved
    pub publish_error: Option<String>,
}

pub struct OrchestratorBuilder<S> {
    storage: Arc<S>,
    clock: Arc<dyn Clock>,
    collaborators: Collaborators,
    config: RuntimeConfig,
    instance_label: Option<String>,
}

impl<S: HeraldStorage + 'static> OrchestratorBuilder<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            clock: Arc::new(SystemClock),
            collaborators: Collaborators::default(),
            config: RuntimeConfig::default(),
            instance_label: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    /// Human-readable prefix for this instance's lock identity.
    pub fn instance_label(mut self, label: impl Into<String>) -> Self {
        self.instance_label = Some(label.into());
        self
    }

    pub fn build(self) -> Orchestrator {
        let Self {
            storage,
            clock,
            collaborators,
            config,
            instance_label,
        } = self;

        let label = instance_label.unwrap_or_else(|| "herald".to_string());
        let holder = HolderId::new(format!("{}-{}", label, Uuid::new_v4()));

        let settings = SettingsStore::new(storage.clone(), clock.clone(), config.settings.clone());
        let limiter = RateLimiter::new(storage.clone(), clock.clone(), config.rate_limits);
        let gate = SafetyGate::new(settings.clone(), limiter.clone());
        let leader = config
            .leader_lock_enabled
            .then(|| LeaderLock::new(storage.clone(), clock.clone(), holder.clone()));

        let storage: Arc<dyn HeraldStorage> = storage;
        let queue = Arc::new(DraftApprovalQueue::new(
            storage.clone(),
            settings.clone(),
            gate,
            collaborators.platform.clone(),
            clock.clone(),
            QueueConfig {
                publish_timeout: config.call_timeout(),
                max_replies_per_thread: config.max_replies_per_thread,
            },
        ));
        let styles = StyleManager::new(storage.clone(), clock.clone(), config.style_policy.clone());

        let registry = Arc::new(WorkerRegistry::new());
        let mut workers: Vec<Arc<dyn Worker>> = Vec::new();
        let timeout = config.call_timeout();
        let Collaborators {
            platform,
            generator,
            scorer,
            extractor,
            analyzer,
        } = collaborators;

        match (&platform, &generator, &scorer) {
            (Some(platform), Some(generator), Some(scorer)) => {
                workers.push(Arc::new(IngestionWorker::new(
                    storage.clone(),
                    settings.clone(),
                    queue.clone(),
                    platform.clone(),
                    generator.clone(),
                    scorer.clone(),
                    clock.clone(),
                    config.ingestion.clone(),
                    timeout,
                )));
            }
            _ => {
                let missing = missing(&[
                    ("platform", platform.is_none()),
                    ("generator", generator.is_none()),
                    ("scorer", scorer.is_none()),
                ]);
                registry.register_unconfigured(WorkerKind::Ingestion, missing);
            }
        }

        match &generator {
            Some(generator) => workers.push(Arc::new(TimelinePoster::new(
                settings.clone(),
                queue.clone(),
                generator.clone(),
                clock.clone(),
                config.timeline.clone(),
                timeout,
            ))),
            None => registry.register_unconfigured(WorkerKind::Timeline, missing(&[("generator", true)])),
        }

        match &extractor {
            Some(extractor) => workers.push(Arc::new(LearningWorker::new(
                storage.clone(),
                settings.clone(),
                extractor.clone(),
                clock.clone(),
                config.learning.clone(),
                timeout,
            ))),
            None => registry.register_unconfigured(WorkerKind::Learning, missing(&[("extractor", true)])),
        }

        match &analyzer {
            Some(analyzer) => workers.push(Arc::new(SelfStyleWorker::new(
                storage.clone(),
                settings.clone(),
                leader.clone(),
                analyzer.clone(),
                clock.clone(),
                config.self_style.clone(),
                timeout,
            ))),
            None => registry.register_unconfigured(WorkerKind::SelfStyle, missing(&[("analyzer", true)])),
        }

        match &platform {
            Some(_) => workers.push(Arc::new(PublisherWorker::new(
                settings.clone(),
                queue.clone(),
                config.publisher.clone(),
            ))),
            None => registry.register_unconfigured(WorkerKind::Publisher, missing(&[("platform", true)])),
        }

        for worker in &workers {
            registry.register(worker.kind());
        }

        let (shutdown, _) = watch::channel(false);
        Orchestrator {
            storage,
            clock,
            holder,
            config,
            settings,
            limiter,
            leader,
            queue,
            styles,
            registry,
            workers,
            shutdown,
        }
    }
}

fn missing(deps: &[(&str, bool)]) -> String {
    let names: Vec<&str> = deps
        .iter()
        .filter(|(_, absent)| *absent)
        .map(|(name, _)| *name)
        .collect();
    format!("missing collaborator: {}", names.join(", "))
}

pub struct Orchestrator {
    storage: Arc<dyn HeraldStorage>,
    clock: Arc<dyn Clock>,
    holder: HolderId,
    config: RuntimeConfig,
    settings: SettingsStore,
    limiter: RateLimiter,
    leader: Option<LeaderLock>,
    queue: Arc<DraftApprovalQueue>,
    styles: StyleManager,
    registry: Arc<WorkerRegistry>,
    workers: Vec<Arc<dyn Worker>>,
    shutdown: watch::Sender<bool>,
}

impl Orchestrator {
    pub fn builder<S: HeraldStorage + 'static>(storage: Arc<S>) -> OrchestratorBuilder<S> {
        OrchestratorBuilder::new(storage)
    }

    /// This instance's lock identity.
    pub fn holder(&self) -> &HolderId {
        &self.holder
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn queue(&self) -> &DraftApprovalQueue {
        &self.queue
    }

    pub fn styles(&self) -> &StyleManager {
        &self.styles
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn leader(&self) -> Option<&LeaderLock> {
        self.leader.as_ref()
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Spawn one task per configured worker.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        info!(
            instance = %self.holder,
            workers = self.workers.len(),
            "Starting workers"
        );
        self.workers
            .iter()
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker.clone(),
                    self.clock.clone(),
                    self.registry.clone(),
                    self.shutdown.subscribe(),
                ))
            })
            .collect()
    }

    /// Stop every worker before its next sleep.
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!(instance = %self.holder, "Shutdown requested");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Receiver that flips to `true` on shutdown.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Run one iteration of `kind` outside its schedule and record it.
    pub async fn run_worker_once(&self, kind: WorkerKind) -> Result<TickReport, WorkerError> {
        let worker = self
            .workers
            .iter()
            .find(|worker| worker.kind() == kind)
            .ok_or_else(|| match self.registry.get(kind) {
                Some(status) => WorkerError::NotConfigured {
                    kind,
                    reason: status.disabled_reason.unwrap_or_default(),
                },
                None => WorkerError::UnknownWorker(kind.to_string()),
            })?;

        let report = worker.run_once().await;
        self.registry.record(kind, &report, self.clock.now());
        Ok(report)
    }

    pub async fn status(&self) -> StorageResult<StatusReport> {
        let lock = match &self.leader {
            Some(leader) => leader.state(&self.config.self_style.lock_key).await?,
            None => None,
        };

        Ok(StatusReport {
            generated_at: self.clock.now(),
            instance: self.holder.clone(),
            settings: self.settings.current().await?,
            inbox: self.storage.inbox_counts().await?,
            drafts: self.storage.draft_counts().await?,
            outbound_posts: self.storage.count_outbound().await?,
            replies: self.storage.count_replies().await?,
            memories: self.storage.count_memories().await?,
            stopped_threads: self.storage.count_stopped_threads().await?,
            active_style: self.storage.active_style_version().await?,
            rate: self.limiter.usage(POST).await?,
            lock,
            workers: self.registry.snapshot(),
        })
    }

    /// Approve a draft, then try to publish it right away. A failed publish
    /// leaves the draft approved for the publisher sweep.
    pub async fn approve_and_publish(
        &self,
        id: &DraftId,
        actor: Option<&str>,
    ) -> ApprovalResult<ApprovalReceipt> {
        let draft = self.queue.approve(id, actor).await?;
        if !self.queue.can_publish() {
            return Ok(ApprovalReceipt {
                draft,
                publish: None,
                publish_error: None,
            });
        }

        match self.queue.publish(id).await {
            Ok(outcome) => {
                let draft = match &outcome {
                    PublishOutcome::Posted { draft, .. } => draft.clone(),
                    PublishOutcome::AlreadyHandled { draft, .. } => draft.clone(),
                    PublishOutcome::Blocked { .. } => draft,
                };
                Ok(ApprovalReceipt {
                    draft,
                    publish: Some(outcome),
                    publish_error: None,
                })
            }
            Err(
                e @ (ApprovalError::Publish(_)
                | ApprovalError::AlreadyFinalized { .. }
                | ApprovalError::PublishInProgress(_)),
            ) => {
                warn!(draft_id = %id, error = %e, "Publish after approval failed");
                let draft = self.queue.get(id).await?;
                Ok(ApprovalReceipt {
                    draft,
                    publish: None,
                    publish_error: Some(e.to_string()),
                })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn reject(
        &self,
        id: &DraftId,
        actor: Option<&str>,
        reason: Option<String>,
    ) -> ApprovalResult<Draft> {
        self.queue.reject(id, actor, reason).await
    }

    pub async fn apply_settings(
        &self,
        patch: SettingsPatch,
        actor: Option<&str>,
    ) -> StorageResult<RuntimeSettings> {
        self.settings.apply(patch, actor).await
    }

    pub async fn memories(
        &self,
        kind: Option<MemoryKind>,
        window: QueryWindow,
    ) -> StorageResult<Vec<Memory>> {
        self.storage.list_memories(kind, window).await
    }

    /// Stop replying in a conversation.
    pub async fn stop_thread(&self, conversation_id: &str) -> StorageResult<Thread> {
        let thread = self.storage.stop_thread(conversation_id, self.clock.now()).await?;
        info!(conversation_id, "Thread stopped by operator");
        Ok(thread)
    }

    pub fn enable_worker(&self, kind: WorkerKind) -> Result<WorkerStatus, WorkerError> {
        self.registry.enable(kind)
    }

    pub fn worker_statuses(&self) -> BTreeMap<WorkerKind, WorkerStatus> {
        self.registry
            .snapshot()
            .into_iter()
            .map(|status| (status.kind, status))
            .collect()
    }
}
