//! Ingestion: deduplication, scoring, cursor handling and failure isolation.

mod support;

use herald_runtime::{CollaboratorError, RuntimeConfig, WorkerError};
use herald_storage::{CursorStore, DraftStore, InboxStore, QueryWindow};
use herald_types::{DraftStatus, ExternalId, RawItem, RunOutcome, SettingsPatch, WorkerKind};
use std::collections::BTreeMap;
use std::time::Duration;
use support::{raw, Harness, StubExtractor, StubGenerator};

#[tokio::test]
async fn duplicate_ids_in_one_batch_store_once() {
    let harness = Harness::new(RuntimeConfig::default());
    harness.platform.push_batch(
        vec![raw("A", "gm"), raw("A", "gm again"), raw("B", "wagmi")],
        Some("cursor-1"),
    );

    let report = harness
        .orchestrator
        .run_worker_once(WorkerKind::Ingestion)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.counter("fetched"), 3);
    assert_eq!(report.counter("stored"), 2);
    assert_eq!(report.counter("duplicates"), 1);
    assert_eq!(report.counter("drafted"), 2);

    let counts = harness.storage.inbox_counts().await.unwrap();
    assert_eq!(counts.total, 2);
    assert!(harness.storage.inbox_exists("x", &ExternalId::new("A")).await.unwrap());
    assert!(harness.storage.inbox_exists("x", &ExternalId::new("B")).await.unwrap());

    let pending = harness
        .storage
        .list_drafts(Some(DraftStatus::Pending), QueryWindow::default())
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(harness.platform.publish_calls(), 0);
}

#[tokio::test]
async fn items_without_ids_dedup_by_content() {
    let harness = Harness::new(RuntimeConfig::default());
    harness.platform.push_batch(
        vec![
            RawItem::new(None, "u1", "same words"),
            RawItem::new(None, "u1", "same words"),
        ],
        None,
    );

    let report = harness
        .orchestrator
        .run_worker_once(WorkerKind::Ingestion)
        .await
        .unwrap();
    assert_eq!(report.counter("stored"), 1);
    assert_eq!(report.counter("duplicates"), 1);
}

#[tokio::test]
async fn low_scores_are_filtered_and_not_stored() {
    let harness = Harness::new(RuntimeConfig::default());
    harness
        .platform
        .push_batch(vec![raw("L1", "low effort"), raw("H1", "great question")], None);

    let report = harness
        .orchestrator
        .run_worker_once(WorkerKind::Ingestion)
        .await
        .unwrap();
    assert_eq!(report.counter("filtered"), 1);
    assert_eq!(report.counter("stored"), 1);
    assert!(!harness.storage.inbox_exists("x", &ExternalId::new("L1")).await.unwrap());
}

#[tokio::test]
async fn cursor_advances_only_after_a_full_poll() {
    let harness = Harness::new(RuntimeConfig::default());
    harness.platform.push_batch(vec![raw("A", "gm")], Some("c-1"));
    harness.platform.push_batch(vec![], None);

    harness
        .orchestrator
        .run_worker_once(WorkerKind::Ingestion)
        .await
        .unwrap();
    assert_eq!(
        harness.storage.get_cursor("x").await.unwrap().as_deref(),
        Some("c-1")
    );

    harness
        .orchestrator
        .run_worker_once(WorkerKind::Ingestion)
        .await
        .unwrap();
    assert_eq!(
        harness.platform.cursors_seen(),
        vec![None, Some("c-1".to_string())]
    );
    // An empty batch without a cursor keeps the old one.
    assert_eq!(
        harness.storage.get_cursor("x").await.unwrap().as_deref(),
        Some("c-1")
    );
}

#[tokio::test]
async fn generation_failure_is_isolated_to_its_item() {
    let storage = std::sync::Arc::new(herald_storage::InMemoryHeraldStorage::new());
    let clock = herald_runtime::ManualClock::new(support::start_time());
    let harness = Harness::with(
        storage,
        clock,
        RuntimeConfig::default(),
        StubGenerator::failing_on("boom"),
        StubExtractor::new(),
    );
    harness.platform.push_batch(
        vec![raw("A", "boom"), raw("B", "fine"), raw("C", "also fine")],
        Some("c-1"),
    );

    let report = harness
        .orchestrator
        .run_worker_once(WorkerKind::Ingestion)
        .await
        .unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.counter("stored"), 3);
    assert_eq!(report.counter("drafted"), 2);
    assert_eq!(report.counter("errors"), 1);

    // The failed item stays stored and unprocessed; the cursor still moves.
    let failed = harness
        .storage
        .get_inbox("x", &ExternalId::new("A"))
        .await
        .unwrap()
        .unwrap();
    assert!(!failed.processed);
    assert_eq!(
        harness.storage.get_cursor("x").await.unwrap().as_deref(),
        Some("c-1")
    );
}

#[tokio::test]
async fn unprocessed_item_is_drafted_on_a_later_poll() {
    let harness = Harness::with(
        std::sync::Arc::new(herald_storage::InMemoryHeraldStorage::new()),
        herald_runtime::ManualClock::new(support::start_time()),
        RuntimeConfig::default(),
        StubGenerator::failing_times(1),
        StubExtractor::new(),
    );
    harness.platform.push_batch(vec![raw("A", "gm")], Some("c-1"));

    let first = harness
        .orchestrator
        .run_worker_once(WorkerKind::Ingestion)
        .await
        .unwrap();
    assert_eq!(first.counter("stored"), 1);
    assert_eq!(first.counter("errors"), 1);
    assert_eq!(first.counter("resumed"), 0);

    let second = harness
        .orchestrator
        .run_worker_once(WorkerKind::Ingestion)
        .await
        .unwrap();
    assert_eq!(second.counter("fetched"), 0);
    assert_eq!(second.counter("resumed"), 1);
    assert_eq!(second.counter("drafted"), 1);
    assert_eq!(second.counter("errors"), 0);

    let item = harness
        .storage
        .get_inbox("x", &ExternalId::new("A"))
        .await
        .unwrap()
        .unwrap();
    assert!(item.processed);
    let pending = harness
        .storage
        .list_drafts(Some(DraftStatus::Pending), QueryWindow::default())
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].reply_to_id, Some(ExternalId::new("A")));
}

#[tokio::test]
async fn item_is_closed_after_max_retries() {
    let mut config = RuntimeConfig::default();
    config.ingestion.max_item_attempts = 2;
    let harness = Harness::with(
        std::sync::Arc::new(herald_storage::InMemoryHeraldStorage::new()),
        herald_runtime::ManualClock::new(support::start_time()),
        config,
        StubGenerator::failing_on("boom"),
        StubExtractor::new(),
    );
    harness.platform.push_batch(vec![raw("A", "boom")], None);

    let mut abandoned = Vec::new();
    for _ in 0..4 {
        let report = harness
            .orchestrator
            .run_worker_once(WorkerKind::Ingestion)
            .await
            .unwrap();
        abandoned.push((report.counter("resumed"), report.counter("abandoned")));
    }
    // Stored on the first poll, retried twice, then left alone.
    assert_eq!(abandoned, vec![(0, 0), (1, 0), (1, 1), (0, 0)]);

    let item = harness
        .storage
        .get_inbox("x", &ExternalId::new("A"))
        .await
        .unwrap()
        .unwrap();
    assert!(item.processed);
    assert_eq!(harness.storage.draft_counts().await.unwrap().get(DraftStatus::Pending), 0);
}

#[tokio::test]
async fn transient_poll_failures_back_off_exponentially() {
    let harness = Harness::new(RuntimeConfig::default());
    harness
        .platform
        .push_poll_error(CollaboratorError::Transient("503".into()));
    harness
        .platform
        .push_poll_error(CollaboratorError::Timeout(Duration::from_secs(30)));

    let first = harness
        .orchestrator
        .run_worker_once(WorkerKind::Ingestion)
        .await
        .unwrap();
    assert!(first.outcome.is_failure());
    assert_eq!(first.next_delay, Some(Duration::from_secs(5)));

    let second = harness
        .orchestrator
        .run_worker_once(WorkerKind::Ingestion)
        .await
        .unwrap();
    assert_eq!(second.next_delay, Some(Duration::from_secs(10)));

    // Success resets the backoff.
    let third = harness
        .orchestrator
        .run_worker_once(WorkerKind::Ingestion)
        .await
        .unwrap();
    assert_eq!(third.outcome, RunOutcome::Completed);
    assert_eq!(third.next_delay, None);

    let status = harness
        .orchestrator
        .registry()
        .get(WorkerKind::Ingestion)
        .unwrap();
    assert_eq!(status.error_count, 2);
    assert!(!status.suspended);
}

#[tokio::test]
async fn unauthorized_poll_suspends_until_enabled() {
    let harness = Harness::new(RuntimeConfig::default());
    harness
        .platform
        .push_poll_error(CollaboratorError::Unauthorized("401".into()));

    let report = harness
        .orchestrator
        .run_worker_once(WorkerKind::Ingestion)
        .await
        .unwrap();
    assert!(matches!(
        report.outcome,
        RunOutcome::Disabled {
            requires_operator: true,
            ..
        }
    ));

    let registry = harness.orchestrator.registry();
    let status = registry.get(WorkerKind::Ingestion).unwrap();
    assert!(status.suspended);
    assert!(!status.enabled);
    assert!(status.disabled_reason.is_some());
    assert!(!registry.is_runnable(WorkerKind::Ingestion));

    let status = harness
        .orchestrator
        .enable_worker(WorkerKind::Ingestion)
        .unwrap();
    assert!(status.enabled);
    assert!(registry.is_runnable(WorkerKind::Ingestion));
}

#[tokio::test]
async fn disabled_flag_reports_reason_without_polling() {
    let harness = Harness::new(RuntimeConfig::default());
    let mut flags = BTreeMap::new();
    flags.insert("ingestion_enabled".to_string(), false);
    harness
        .orchestrator
        .apply_settings(
            SettingsPatch {
                flags,
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();

    let report = harness
        .orchestrator
        .run_worker_once(WorkerKind::Ingestion)
        .await
        .unwrap();
    assert!(matches!(
        report.outcome,
        RunOutcome::Disabled {
            requires_operator: false,
            ..
        }
    ));
    assert!(harness.platform.cursors_seen().is_empty());
}

#[tokio::test]
async fn approval_off_publishes_immediately() {
    let mut config = RuntimeConfig::default();
    config.settings.approval_required = false;
    let harness = Harness::new(config);
    harness.platform.push_batch(vec![raw("A", "gm")], None);

    let report = harness
        .orchestrator
        .run_worker_once(WorkerKind::Ingestion)
        .await
        .unwrap();
    assert_eq!(report.counter("published"), 1);

    let published = harness.platform.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].1, Some(ExternalId::new("A")));
}

#[tokio::test]
async fn missing_collaborators_leave_worker_unconfigured() {
    let storage = std::sync::Arc::new(herald_storage::InMemoryHeraldStorage::new());
    let orchestrator = herald_runtime::Orchestrator::builder(storage).build();

    assert!(matches!(
        orchestrator.run_worker_once(WorkerKind::Ingestion).await,
        Err(WorkerError::NotConfigured { .. })
    ));
    let status = orchestrator.registry().get(WorkerKind::Ingestion).unwrap();
    assert!(!status.enabled);
    assert_eq!(
        status.disabled_reason.as_deref(),
        Some("missing collaborator: platform, generator, scorer")
    );
    assert!(orchestrator.start().is_empty());
}
