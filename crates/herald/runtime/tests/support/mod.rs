//! Shared fixtures for runtime integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use herald_runtime::{
    Analyzer, Clock, CollaboratorError, CollaboratorResult, Collaborators, ContentGenerator,
    Extractor, LearningRow, ManualClock, Orchestrator, Platform, PollBatch, RuntimeConfig, Scorer,
};
use herald_storage::{InMemoryHeraldStorage, OutboundStore};
use herald_types::{
    Draft, ExternalId, InboxItem, MemoryCandidate, MemoryKind, OutboundPost, RawItem,
    StyleVersionPayload,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap()
}

/// Platform double with scripted poll results and recorded publishes.
#[derive(Default)]
pub struct ScriptedPlatform {
    polls: Mutex<VecDeque<CollaboratorResult<PollBatch>>>,
    publish_failures: Mutex<VecDeque<CollaboratorError>>,
    published: Mutex<Vec<(String, Option<ExternalId>)>>,
    cursors_seen: Mutex<Vec<Option<String>>>,
    next_id: AtomicUsize,
}

impl ScriptedPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_batch(&self, items: Vec<RawItem>, next_cursor: Option<&str>) {
        self.polls.lock().unwrap().push_back(Ok(PollBatch {
            items,
            next_cursor: next_cursor.map(str::to_string),
        }));
    }

    pub fn push_poll_error(&self, error: CollaboratorError) {
        self.polls.lock().unwrap().push_back(Err(error));
    }

    pub fn fail_next_publish(&self, error: CollaboratorError) {
        self.publish_failures.lock().unwrap().push_back(error);
    }

    pub fn publish_calls(&self) -> usize {
        self.published.lock().unwrap().len()
    }

    pub fn published(&self) -> Vec<(String, Option<ExternalId>)> {
        self.published.lock().unwrap().clone()
    }

    pub fn cursors_seen(&self) -> Vec<Option<String>> {
        self.cursors_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Platform for ScriptedPlatform {
    async fn poll(&self, cursor: Option<&str>) -> CollaboratorResult<PollBatch> {
        self.cursors_seen
            .lock()
            .unwrap()
            .push(cursor.map(str::to_string));
        self.polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(PollBatch::default()))
    }

    async fn publish(
        &self,
        text: &str,
        reply_to: Option<&ExternalId>,
    ) -> CollaboratorResult<ExternalId> {
        // Give racing publishers a chance to interleave.
        tokio::task::yield_now().await;

        if let Some(error) = self.publish_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.published
            .lock()
            .unwrap()
            .push((text.to_string(), reply_to.cloned()));
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(ExternalId::new(format!("out-{}", n)))
    }
}

/// Generator that replies with a fixed prefix. Items whose text contains
/// `fail_on` make generation fail.
pub struct StubGenerator {
    pub fail_on: Option<String>,
    pub calls: AtomicUsize,
    failures_left: AtomicUsize,
}

impl StubGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail_on: None,
            calls: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
        })
    }

    pub fn failing_on(text: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_on: Some(text.to_string()),
            calls: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
        })
    }

    /// Fails the next `times` reply generations, then recovers.
    pub fn failing_times(times: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_on: None,
            calls: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(times),
        })
    }
}

#[async_trait]
impl ContentGenerator for StubGenerator {
    async fn generate_reply(&self, item: &InboxItem) -> CollaboratorResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CollaboratorError::Transient("generator 503".into()));
        }
        if let Some(marker) = &self.fail_on {
            if item.text.contains(marker.as_str()) {
                return Err(CollaboratorError::InvalidResponse("empty completion".into()));
            }
        }
        Ok(format!("re: {}", item.text))
    }

    async fn generate_timeline_post(&self) -> CollaboratorResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("gm".to_string())
    }
}

/// Scores items by a marker in their text: "low" scores 0.1, anything else 0.9.
pub struct MarkerScorer;

#[async_trait]
impl Scorer for MarkerScorer {
    async fn score(&self, item: &RawItem) -> CollaboratorResult<f64> {
        Ok(if item.text.contains("low") { 0.1 } else { 0.9 })
    }
}

/// One slang memory per row, derived from the row text.
#[derive(Default)]
pub struct StubExtractor {
    pub calls: AtomicUsize,
    pub fail_on: Option<String>,
}

impl StubExtractor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_on(text: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_on: Some(text.to_string()),
        })
    }
}

#[async_trait]
impl Extractor for StubExtractor {
    async fn extract(&self, row: &LearningRow) -> CollaboratorResult<Vec<MemoryCandidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = &self.fail_on {
            if row.text().contains(marker.as_str()) {
                return Err(CollaboratorError::Transient("extractor 503".into()));
            }
        }
        Ok(vec![MemoryCandidate {
            kind: MemoryKind::Slang,
            content: row.text().to_string(),
            confidence: 0.7,
            source_ids: Vec::new(),
            metadata: Value::Null,
        }])
    }
}

pub struct StubAnalyzer;

#[async_trait]
impl Analyzer for StubAnalyzer {
    async fn build_style_version(
        &self,
        posts: &[OutboundPost],
    ) -> CollaboratorResult<StyleVersionPayload> {
        Ok(StyleVersionPayload {
            rules: vec!["keep it short".to_string()],
            vocabulary: vec!["gm".to_string()],
            max_post_chars: Some(200),
            summary: Some(format!("{} posts analyzed", posts.len())),
            metadata: Value::Null,
        })
    }
}

/// One simulated instance and its doubles.
pub struct Harness {
    pub storage: Arc<InMemoryHeraldStorage>,
    pub clock: ManualClock,
    pub platform: Arc<ScriptedPlatform>,
    pub generator: Arc<StubGenerator>,
    pub extractor: Arc<StubExtractor>,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub fn new(config: RuntimeConfig) -> Self {
        let storage = Arc::new(InMemoryHeraldStorage::new());
        let clock = ManualClock::new(start_time());
        Self::with(storage, clock, config, StubGenerator::new(), StubExtractor::new())
    }

    pub fn with(
        storage: Arc<InMemoryHeraldStorage>,
        clock: ManualClock,
        config: RuntimeConfig,
        generator: Arc<StubGenerator>,
        extractor: Arc<StubExtractor>,
    ) -> Self {
        let platform = ScriptedPlatform::new();
        let orchestrator = instance(&storage, &clock, &platform, &generator, &extractor, config);
        Self {
            storage,
            clock,
            platform,
            generator,
            extractor,
            orchestrator,
        }
    }

    /// Another instance sharing this harness's storage, clock and doubles.
    pub fn peer(&self, config: RuntimeConfig) -> Orchestrator {
        instance(
            &self.storage,
            &self.clock,
            &self.platform,
            &self.generator,
            &self.extractor,
            config,
        )
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Seed `count` posted outbound rows.
    pub async fn posted(&self, count: usize) {
        for n in 0..count {
            let draft = Draft::timeline(format!("post {}", n), self.clock.now());
            let post = OutboundPost::posted_from(
                &draft,
                ExternalId::new(format!("seed-{}", n)),
                self.clock.now(),
            );
            self.storage.insert_outbound(post).await.unwrap();
        }
    }
}

pub fn instance(
    storage: &Arc<InMemoryHeraldStorage>,
    clock: &ManualClock,
    platform: &Arc<ScriptedPlatform>,
    generator: &Arc<StubGenerator>,
    extractor: &Arc<StubExtractor>,
    config: RuntimeConfig,
) -> Orchestrator {
    let collaborators = Collaborators {
        platform: Some(platform.clone()),
        generator: Some(generator.clone()),
        scorer: Some(Arc::new(MarkerScorer)),
        extractor: Some(extractor.clone()),
        analyzer: Some(Arc::new(StubAnalyzer)),
    };
    let clock: Arc<dyn Clock> = Arc::new(clock.clone());

    Orchestrator::builder(storage.clone())
        .clock(clock)
        .config(config)
        .collaborators(collaborators)
        .instance_label("test")
        .build()
}

pub fn raw(id: &str, text: &str) -> RawItem {
    RawItem::new(Some(id), "user-1", text)
}
