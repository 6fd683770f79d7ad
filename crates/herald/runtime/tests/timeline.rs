//! Timeline poster: drafting, immediate publish and the switches that stop it.

mod support;

use herald_runtime::{RateLimits, RuntimeConfig};
use herald_storage::{DraftStore, OutboundStore, QueryWindow};
use herald_types::{DraftStatus, PostType, RunOutcome, SettingsPatch, SkipReason, WorkerKind};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use support::Harness;

#[tokio::test]
async fn drafts_a_pending_post_while_approval_is_required() {
    let harness = Harness::new(RuntimeConfig::default());

    let report = harness
        .orchestrator
        .run_worker_once(WorkerKind::Timeline)
        .await
        .unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.counter("drafted"), 1);
    assert_eq!(report.counter("published"), 0);

    let pending = harness
        .storage
        .list_drafts(Some(DraftStatus::Pending), QueryWindow::default())
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].post_type, PostType::Timeline);
    assert_eq!(pending[0].text, "gm");
    assert!(pending[0].reply_to_id.is_none());
    assert_eq!(harness.platform.publish_calls(), 0);
}

#[tokio::test]
async fn publishes_immediately_when_approval_is_off() {
    let mut config = RuntimeConfig::default();
    config.settings.approval_required = false;
    let harness = Harness::new(config);

    let report = harness
        .orchestrator
        .run_worker_once(WorkerKind::Timeline)
        .await
        .unwrap();
    assert_eq!(report.counter("drafted"), 1);
    assert_eq!(report.counter("published"), 1);

    assert_eq!(harness.platform.published(), vec![("gm".to_string(), None)]);
    assert_eq!(harness.storage.count_outbound().await.unwrap(), 1);
    let counts = harness.storage.draft_counts().await.unwrap();
    assert_eq!(counts.get(DraftStatus::Posted), 1);
    assert_eq!(counts.get(DraftStatus::Pending), 0);
}

#[tokio::test]
async fn rate_limited_immediate_publish_leaves_the_draft_pending() {
    let mut config = RuntimeConfig::default();
    config.settings.approval_required = false;
    config.rate_limits = RateLimits {
        hourly: 0,
        daily: 10,
    };
    let harness = Harness::new(config);

    let report = harness
        .orchestrator
        .run_worker_once(WorkerKind::Timeline)
        .await
        .unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.counter("published"), 0);
    assert_eq!(harness.platform.publish_calls(), 0);

    let counts = harness.storage.draft_counts().await.unwrap();
    assert_eq!(counts.get(DraftStatus::Pending), 1);
}

#[tokio::test]
async fn safe_mode_skips_without_generating() {
    let harness = Harness::new(RuntimeConfig::default());
    harness
        .orchestrator
        .apply_settings(
            SettingsPatch {
                safe_mode: Some(true),
                ..Default::default()
            },
            Some("ops"),
        )
        .await
        .unwrap();

    let report = harness
        .orchestrator
        .run_worker_once(WorkerKind::Timeline)
        .await
        .unwrap();
    assert_eq!(report.outcome, RunOutcome::skipped(SkipReason::SafeMode));
    assert_eq!(harness.generator.calls.load(Ordering::SeqCst), 0);
    assert!(harness
        .storage
        .list_drafts(None, QueryWindow::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn flag_off_disables_without_operator_action() {
    let harness = Harness::new(RuntimeConfig::default());
    let mut flags = BTreeMap::new();
    flags.insert("timeline_enabled".to_string(), false);
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
        .run_worker_once(WorkerKind::Timeline)
        .await
        .unwrap();
    assert!(matches!(
        report.outcome,
        RunOutcome::Disabled {
            requires_operator: false,
            ..
        }
    ));
    assert_eq!(harness.generator.calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.storage.draft_counts().await.unwrap().get(DraftStatus::Pending), 0);
}
