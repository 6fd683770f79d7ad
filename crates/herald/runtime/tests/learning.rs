//! Learning extraction is idempotent, isolates per-row failures and keeps
//! failing rows from starving healthy ones.

mod support;

use herald_runtime::{ManualClock, RuntimeConfig};
use herald_storage::{InMemoryHeraldStorage, InboxStore, MemoryStore, OutboundStore};
use herald_types::{InboxItem, RunOutcome, SkipReason, WorkerKind};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use support::{raw, start_time, Harness, StubExtractor, StubGenerator};

async fn seed_inbox(harness: &Harness, ids: &[&str]) {
    for id in ids {
        let item = InboxItem::from_raw("x", &raw(id, &format!("text {}", id)), 0.9, harness.now());
        assert!(harness.storage.insert_inbox(item).await.unwrap());
    }
}

#[tokio::test]
async fn second_run_over_unchanged_data_is_a_no_op() {
    let harness = Harness::new(RuntimeConfig::default());
    seed_inbox(&harness, &["A", "B", "C"]).await;
    harness.posted(2).await;

    let first = harness
        .orchestrator
        .run_worker_once(WorkerKind::Learning)
        .await
        .unwrap();
    assert_eq!(first.outcome, RunOutcome::Completed);
    assert_eq!(first.counter("processed"), 5);

    let after_first = harness.storage.inbox_counts().await.unwrap();
    let memories_after_first = harness.storage.count_memories().await.unwrap();
    assert_eq!(after_first.unlearned, 0);
    assert_eq!(memories_after_first, 5);

    let second = harness
        .orchestrator
        .run_worker_once(WorkerKind::Learning)
        .await
        .unwrap();
    assert_eq!(second.outcome, RunOutcome::skipped(SkipReason::NothingToDo));

    assert_eq!(harness.storage.inbox_counts().await.unwrap(), after_first);
    assert_eq!(harness.storage.count_memories().await.unwrap(), memories_after_first);
    assert!(harness
        .storage
        .list_unlearned_outbound(10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn batch_size_bounds_each_run_oldest_first() {
    let mut config = RuntimeConfig::default();
    config.learning.batch_size = 2;
    let harness = Harness::new(config);

    for (n, id) in ["A", "B", "C"].iter().enumerate() {
        let at = harness.now() + chrono::Duration::seconds(n as i64);
        let item = InboxItem::from_raw("x", &raw(id, id), 0.9, at);
        harness.storage.insert_inbox(item).await.unwrap();
    }

    let first = harness
        .orchestrator
        .run_worker_once(WorkerKind::Learning)
        .await
        .unwrap();
    assert_eq!(first.counter("processed"), 2);

    let remaining = harness.storage.list_unlearned_inbox(10).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].external_id.as_str(), "C");
}

#[tokio::test]
async fn failed_row_is_retried_without_blocking_others() {
    let storage = Arc::new(InMemoryHeraldStorage::new());
    let harness = Harness::with(
        storage,
        ManualClock::new(start_time()),
        RuntimeConfig::default(),
        StubGenerator::new(),
        StubExtractor::failing_on("text B"),
    );
    seed_inbox(&harness, &["A", "B", "C"]).await;

    let report = harness
        .orchestrator
        .run_worker_once(WorkerKind::Learning)
        .await
        .unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.counter("processed"), 2);
    assert_eq!(report.counter("errors"), 1);

    let remaining = harness.storage.list_unlearned_inbox(10).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].external_id.as_str(), "B");
}

async fn seed_texts(harness: &Harness, rows: &[(&str, &str)]) {
    for (n, (id, text)) in rows.iter().enumerate() {
        let at = harness.now() + chrono::Duration::seconds(n as i64);
        let item = InboxItem::from_raw("x", &raw(id, text), 0.9, at);
        assert!(harness.storage.insert_inbox(item).await.unwrap());
    }
}

#[tokio::test]
async fn failing_rows_filling_the_batch_do_not_starve_newer_rows() {
    let mut config = RuntimeConfig::default();
    config.learning.batch_size = 2;
    config.learning.retry_base_secs = 60;
    let harness = Harness::with(
        Arc::new(InMemoryHeraldStorage::new()),
        ManualClock::new(start_time()),
        config,
        StubGenerator::new(),
        StubExtractor::failing_on("broken"),
    );
    seed_texts(&harness, &[("A", "broken A"), ("B", "broken B"), ("C", "fine C")]).await;

    let first = harness
        .orchestrator
        .run_worker_once(WorkerKind::Learning)
        .await
        .unwrap();
    assert_eq!(first.counter("errors"), 2);
    assert_eq!(first.counter("processed"), 0);

    let second = harness
        .orchestrator
        .run_worker_once(WorkerKind::Learning)
        .await
        .unwrap();
    assert_eq!(second.counter("processed"), 1);
    assert_eq!(second.counter("errors"), 0);

    let remaining: Vec<String> = harness
        .storage
        .list_unlearned_inbox(10)
        .await
        .unwrap()
        .iter()
        .map(|item| item.external_id.as_str().to_string())
        .collect();
    assert_eq!(remaining, vec!["A", "B"]);

    // Cooling rows come back once their retry delay has passed.
    harness.clock.advance(Duration::from_secs(61));
    let retry = harness
        .orchestrator
        .run_worker_once(WorkerKind::Learning)
        .await
        .unwrap();
    assert_eq!(retry.counter("errors"), 2);
}

#[tokio::test]
async fn row_is_retired_after_max_attempts() {
    let mut config = RuntimeConfig::default();
    config.learning.retry_base_secs = 10;
    config.learning.max_attempts = 2;
    let harness = Harness::with(
        Arc::new(InMemoryHeraldStorage::new()),
        ManualClock::new(start_time()),
        config,
        StubGenerator::new(),
        StubExtractor::failing_on("broken"),
    );
    seed_texts(&harness, &[("A", "broken A"), ("B", "fine B")]).await;

    let first = harness
        .orchestrator
        .run_worker_once(WorkerKind::Learning)
        .await
        .unwrap();
    assert_eq!(first.counter("processed"), 1);
    assert_eq!(first.counter("abandoned"), 0);

    harness.clock.advance(Duration::from_secs(11));
    let second = harness
        .orchestrator
        .run_worker_once(WorkerKind::Learning)
        .await
        .unwrap();
    assert_eq!(second.counter("errors"), 1);
    assert_eq!(second.counter("abandoned"), 1);

    assert_eq!(harness.storage.inbox_counts().await.unwrap().unlearned, 0);
    assert_eq!(harness.storage.count_memories().await.unwrap(), 1);
    assert_eq!(harness.extractor.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn racing_instances_claim_each_row_once() {
    let harness = Harness::new(RuntimeConfig::default());
    let peer = harness.peer(RuntimeConfig::default());
    seed_inbox(&harness, &["A", "B"]).await;

    let (a, b) = tokio::join!(
        harness.orchestrator.run_worker_once(WorkerKind::Learning),
        peer.run_worker_once(WorkerKind::Learning),
    );
    let processed = a.unwrap().counter("processed") + b.unwrap().counter("processed");
    assert_eq!(processed, 2);
    assert_eq!(harness.storage.inbox_counts().await.unwrap().unlearned, 0);
}
