//! Draft approval queue.
//!
//! Owns every draft status change. Transitions are checked against the
//! draft state machine and written with a compare-and-set on the previous
//! status, so two operators (or an operator and the publisher sweep) racing
//! on one draft cannot both win.
//!
//! Publishing first takes the draft's publish claim, so one draft reaches
//! the platform at most once across all instances. A reply additionally
//! claims the reply-log row for its target, which guarantees at most one
//! reply per inbound message even across different drafts. Failed attempts
//! release both claims and the reserved rate slot.

use crate::clock::Clock;
use crate::collaborators::{call_with_timeout, Platform};
use crate::error::ApprovalError;
use crate::rate_limit::Reservation;
use crate::safety::{ActionOrigin, Admission, BlockReason, SafetyGate};
use crate::settings::SettingsStore;
use herald_storage::{
    DraftStore, HeraldStorage, OutboundStore, QueryWindow, ReplyLogStore, StorageError, ThreadStore,
};
use herald_types::{
    Draft, DraftAction, DraftId, DraftStatus, ExternalId, OutboundPost, PostType, ReplyLogEntry,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub type ApprovalResult<T> = Result<T, ApprovalError>;

/// Result of a publish attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PublishOutcome {
    /// The platform accepted the post.
    Posted {
        draft: Draft,
        external_id: ExternalId,
    },
    /// Another draft already replied to the same message. The draft is
    /// finalized without calling the platform.
    AlreadyHandled { draft: Draft, winner: DraftId },
    /// The safety gate refused. The draft is unchanged.
    Blocked { reason: BlockReason },
}

/// Queue tuning
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub publish_timeout: Duration,
    pub max_replies_per_thread: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            publish_timeout: Duration::from_secs(30),
            max_replies_per_thread: 5,
        }
    }
}

pub struct DraftApprovalQueue {
    storage: Arc<dyn HeraldStorage>,
    settings: SettingsStore,
    gate: SafetyGate,
    platform: Option<Arc<dyn Platform>>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
}

impl DraftApprovalQueue {
    pub fn new(
        storage: Arc<dyn HeraldStorage>,
        settings: SettingsStore,
        gate: SafetyGate,
        platform: Option<Arc<dyn Platform>>,
        clock: Arc<dyn Clock>,
        config: QueueConfig,
    ) -> Self {
        Self {
            storage,
            settings,
            gate,
            platform,
            clock,
            config,
        }
    }

    pub fn can_publish(&self) -> bool {
        self.platform.is_some()
    }

    /// Enqueue a new pending draft.
    pub async fn submit(&self, draft: Draft) -> ApprovalResult<Draft> {
        self.storage.create_draft(draft.clone()).await?;
        debug!(draft_id = %draft.id, post_type = %draft.post_type, "Draft queued");
        Ok(draft)
    }

    pub async fn get(&self, id: &DraftId) -> ApprovalResult<Draft> {
        self.storage
            .get_draft(id)
            .await?
            .ok_or(ApprovalError::NotFound(*id))
    }

    pub async fn list(
        &self,
        status: Option<DraftStatus>,
        window: QueryWindow,
    ) -> ApprovalResult<Vec<Draft>> {
        Ok(self.storage.list_drafts(status, window).await?)
    }

    /// Drafts the publisher may attempt, oldest first.
    pub async fn publishable(&self, limit: usize) -> ApprovalResult<Vec<Draft>> {
        let settings = self.settings.current().await?;
        let mut drafts = self
            .storage
            .list_drafts_oldest_first(DraftStatus::Approved, limit)
            .await?;

        if !settings.approval_required {
            let pending = self
                .storage
                .list_drafts_oldest_first(DraftStatus::Pending, limit)
                .await?;
            drafts.extend(pending);
            drafts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            drafts.truncate(limit);
        }
        Ok(drafts)
    }

    pub async fn approve(&self, id: &DraftId, actor: Option<&str>) -> ApprovalResult<Draft> {
        let draft = self.get(id).await?;
        let next = draft
            .status
            .apply(DraftAction::Approve, true)
            .map_err(|e| ApprovalError::from_transition(*id, e))?;

        let mut updated = draft.clone();
        updated.status = next;
        updated.decided_by = actor.map(str::to_string);
        updated.updated_at = self.clock.now();

        self.write_transition(updated.clone(), draft.status).await?;
        info!(draft_id = %id, actor = actor.unwrap_or("unknown"), "Draft approved");
        Ok(updated)
    }

    pub async fn reject(
        &self,
        id: &DraftId,
        actor: Option<&str>,
        reason: Option<String>,
    ) -> ApprovalResult<Draft> {
        let draft = self.get(id).await?;
        let next = draft
            .status
            .apply(DraftAction::Reject, true)
            .map_err(|e| ApprovalError::from_transition(*id, e))?;

        let mut updated = draft.clone();
        updated.status = next;
        updated.decided_by = actor.map(str::to_string);
        updated.rejection_reason = reason;
        updated.updated_at = self.clock.now();

        self.write_transition(updated.clone(), draft.status).await?;
        info!(draft_id = %id, actor = actor.unwrap_or("unknown"), "Draft rejected");
        Ok(updated)
    }

    /// Publish a draft through the safety gate.
    ///
    /// Allowed from `approved`, or from `pending` while approval is not
    /// required. A gate refusal is an `Ok(Blocked)` outcome, not an error.
    /// Only the caller holding the draft's publish claim reaches the platform,
    /// and only with a rate slot already reserved.
    pub async fn publish(&self, id: &DraftId) -> ApprovalResult<PublishOutcome> {
        let settings = self.settings.current().await?;
        let draft = self.get(id).await?;
        draft
            .status
            .apply(DraftAction::Publish, settings.approval_required)
            .map_err(|e| ApprovalError::from_transition(*id, e))?;

        let platform = self
            .platform
            .as_ref()
            .ok_or(ApprovalError::PublisherUnavailable)?;

        if !self.storage.claim_draft_publish(id, self.clock.now()).await? {
            return Err(self.claim_lost(&draft).await);
        }

        // Re-read under the claim; an operator may have decided meanwhile.
        let draft = match self.get(id).await.and_then(|current| {
            current
                .status
                .apply(DraftAction::Publish, settings.approval_required)
                .map_err(|e| ApprovalError::from_transition(*id, e))
                .map(|_| current)
        }) {
            Ok(draft) => draft,
            Err(e) => {
                self.release_claim(id).await;
                return Err(e);
            }
        };

        let origin = match draft.status {
            DraftStatus::Approved => ActionOrigin::ApprovedDraft,
            _ => ActionOrigin::PendingDraft,
        };
        let reservation = match self.gate.admit(origin).await {
            Admission::Granted(reservation) => reservation,
            Admission::Blocked(reason) => {
                self.release_claim(id).await;
                debug!(draft_id = %id, reason = %reason, "Publish blocked by safety gate");
                return Ok(PublishOutcome::Blocked { reason });
            }
        };

        if let Some(target) = &draft.reply_to_id.clone() {
            let claim = ReplyLogEntry::claim(target.clone(), draft.id, self.clock.now());
            match self.storage.claim_reply(claim).await {
                Ok(true) => {}
                Ok(false) => {
                    self.cancel_reservation(id, reservation).await;
                    return self.finalize_duplicate(draft, target).await;
                }
                Err(e) => {
                    self.cancel_reservation(id, reservation).await;
                    self.release_claim(id).await;
                    return Err(e.into());
                }
            }
        }

        let published = call_with_timeout(
            self.config.publish_timeout,
            platform.publish(&draft.text, draft.reply_to_id.as_ref()),
        )
        .await;

        let external_id = match published {
            Ok(external_id) => external_id,
            Err(e) => {
                if let Some(target) = &draft.reply_to_id {
                    if let Err(release_err) = self.storage.release_reply(target, &draft.id).await {
                        warn!(draft_id = %id, error = %release_err, "Failed to release reply claim");
                    }
                }
                self.cancel_reservation(id, reservation).await;
                self.release_claim(id).await;
                warn!(draft_id = %id, error = %e, "Publish failed");
                return Err(ApprovalError::Publish(e));
            }
        };

        // From here the post exists; the publish claim is never released.
        let now = self.clock.now();
        if let Some(target) = &draft.reply_to_id {
            if let Err(e) = self
                .storage
                .complete_reply(target, &draft.id, &external_id, now)
                .await
            {
                warn!(draft_id = %id, error = %e, "Failed to complete reply claim");
            }
        }

        let mut posted = draft.clone();
        posted.status = DraftStatus::Posted;
        posted.external_id = Some(external_id.clone());
        posted.posted_at = Some(now);
        posted.updated_at = now;
        self.write_transition(posted.clone(), draft.status).await?;

        self.storage
            .insert_outbound(OutboundPost::posted_from(&posted, external_id.clone(), now))
            .await?;

        if posted.post_type == PostType::Reply {
            if let Some(conversation_id) = &posted.conversation_id {
                let thread = self
                    .storage
                    .record_thread_reply(conversation_id, self.config.max_replies_per_thread, now)
                    .await?;
                if thread.stopped {
                    info!(
                        conversation_id = %conversation_id,
                        replies = thread.reply_count,
                        "Thread reached reply limit, stopping"
                    );
                }
            }
        }

        info!(draft_id = %id, external_id = %external_id, "Draft published");
        Ok(PublishOutcome::Posted {
            draft: posted,
            external_id,
        })
    }

    /// Someone else holds the publish claim. Report what they left behind.
    async fn claim_lost(&self, draft: &Draft) -> ApprovalError {
        match self.get(&draft.id).await {
            Ok(current) if current.status.is_terminal() => ApprovalError::AlreadyFinalized {
                id: draft.id,
                status: current.status,
            },
            Ok(_) => {
                debug!(draft_id = %draft.id, "Draft is being published elsewhere");
                ApprovalError::PublishInProgress(draft.id)
            }
            Err(e) => e,
        }
    }

    async fn release_claim(&self, id: &DraftId) {
        if let Err(e) = self.storage.release_draft_publish(id).await {
            warn!(draft_id = %id, error = %e, "Failed to release publish claim");
        }
    }

    async fn cancel_reservation(&self, id: &DraftId, reservation: Reservation) {
        if let Err(e) = self.gate.limiter().cancel(reservation).await {
            warn!(draft_id = %id, error = %e, "Failed to cancel rate reservation");
        }
    }

    /// Another draft owns the reply to `target`; close this one as handled.
    async fn finalize_duplicate(
        &self,
        draft: Draft,
        target: &ExternalId,
    ) -> ApprovalResult<PublishOutcome> {
        let winner = self.storage.get_reply(target).await?;
        let (winner_id, winner_external) = match winner {
            Some(entry) => (entry.draft_id, entry.reply_external_id),
            None => (draft.id, None),
        };

        debug!(
            draft_id = %draft.id,
            reply_to_id = %target,
            winner = %winner_id,
            "Reply already handled, skipping publish"
        );

        let now = self.clock.now();
        let mut handled = draft.clone();
        handled.status = DraftStatus::Posted;
        handled.external_id = winner_external;
        handled.posted_at = Some(now);
        handled.updated_at = now;
        handled.note = Some(format!("reply to {} already handled by {}", target, winner_id));
        self.write_transition(handled.clone(), draft.status).await?;

        Ok(PublishOutcome::AlreadyHandled {
            draft: handled,
            winner: winner_id,
        })
    }

    /// CAS write; a lost race is reported as the status the winner left.
    async fn write_transition(&self, draft: Draft, expected_from: DraftStatus) -> ApprovalResult<()> {
        let id = draft.id;
        match self.storage.update_draft(draft, expected_from).await {
            Ok(()) => Ok(()),
            Err(StorageError::InvariantViolation(_)) => {
                let current = self.get(&id).await?;
                debug!(draft_id = %id, status = %current.status, "Draft changed concurrently");
                Err(ApprovalError::AlreadyFinalized {
                    id,
                    status: current.status,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::collaborators::{CollaboratorResult, PollBatch};
    use crate::error::CollaboratorError;
    use crate::rate_limit::{RateLimiter, RateLimits};
    use async_trait::async_trait;
    use herald_storage::{CounterStore, InMemoryHeraldStorage};
    use herald_types::{RuntimeSettings, SettingsPatch};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingPlatform {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Platform for CountingPlatform {
        async fn poll(&self, _cursor: Option<&str>) -> CollaboratorResult<PollBatch> {
            Ok(PollBatch::default())
        }

        async fn publish(
            &self,
            _text: &str,
            _reply_to: Option<&ExternalId>,
        ) -> CollaboratorResult<ExternalId> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CollaboratorError::Transient("503".into()));
            }
            Ok(ExternalId::new(format!("post-{}", n)))
        }
    }

    struct Fixture {
        queue: DraftApprovalQueue,
        settings: SettingsStore,
        storage: Arc<InMemoryHeraldStorage>,
        platform: Arc<CountingPlatform>,
    }

    fn fixture(platform: CountingPlatform) -> Fixture {
        let storage = Arc::new(InMemoryHeraldStorage::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let settings = SettingsStore::new(storage.clone(), clock.clone(), RuntimeSettings::default());
        let limiter = RateLimiter::new(storage.clone(), clock.clone(), RateLimits::default());
        let gate = SafetyGate::new(settings.clone(), limiter);
        let platform = Arc::new(platform);
        let queue = DraftApprovalQueue::new(
            storage.clone(),
            settings.clone(),
            gate,
            Some(platform.clone()),
            clock,
            QueueConfig::default(),
        );
        Fixture {
            queue,
            settings,
            storage,
            platform,
        }
    }

    fn reply(target: &str) -> Draft {
        Draft::reply(
            "on it",
            ExternalId::from(target),
            Some("conv-1".to_string()),
            chrono::Utc::now(),
        )
    }

    #[tokio::test]
    async fn approve_twice_is_already_finalized() {
        let fx = fixture(CountingPlatform::default());
        let draft = fx.queue.submit(reply("A")).await.unwrap();

        fx.queue.approve(&draft.id, Some("ops")).await.unwrap();
        let err = fx.queue.approve(&draft.id, Some("ops")).await.unwrap_err();
        assert!(matches!(
            err,
            ApprovalError::AlreadyFinalized {
                status: DraftStatus::Approved,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn publish_from_pending_requires_approval_off() {
        let fx = fixture(CountingPlatform::default());
        let draft = fx.queue.submit(reply("A")).await.unwrap();

        let err = fx.queue.publish(&draft.id).await.unwrap_err();
        assert!(matches!(err, ApprovalError::ApprovalRequired(_)));
        assert_eq!(fx.platform.calls.load(Ordering::SeqCst), 0);

        let patch = SettingsPatch {
            approval_required: Some(false),
            ..Default::default()
        };
        fx.settings.apply(patch, None).await.unwrap();
        let outcome = fx.queue.publish(&draft.id).await.unwrap();
        assert!(matches!(outcome, PublishOutcome::Posted { .. }));
    }

    #[tokio::test]
    async fn rejected_draft_cannot_be_published() {
        let fx = fixture(CountingPlatform::default());
        let draft = fx.queue.submit(reply("A")).await.unwrap();
        fx.queue.reject(&draft.id, None, Some("off-brand".into())).await.unwrap();

        let err = fx.queue.publish(&draft.id).await.unwrap_err();
        assert!(matches!(
            err,
            ApprovalError::AlreadyFinalized {
                status: DraftStatus::Rejected,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn published_reply_writes_log_post_and_thread() {
        let fx = fixture(CountingPlatform::default());
        let draft = fx.queue.submit(reply("A")).await.unwrap();
        fx.queue.approve(&draft.id, None).await.unwrap();

        let outcome = fx.queue.publish(&draft.id).await.unwrap();
        let PublishOutcome::Posted { draft: posted, external_id } = outcome else {
            panic!("expected posted outcome");
        };
        assert_eq!(posted.status, DraftStatus::Posted);
        assert_eq!(posted.external_id.as_ref(), Some(&external_id));

        let entry = fx.storage.get_reply(&ExternalId::from("A")).await.unwrap().unwrap();
        assert_eq!(entry.reply_external_id, Some(external_id));
        assert!(entry.is_complete());

        let thread = fx.storage.get_thread("conv-1").await.unwrap().unwrap();
        assert_eq!(thread.reply_count, 1);
        assert_eq!(fx.storage.count_outbound().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn second_reply_to_same_message_is_already_handled() {
        let fx = fixture(CountingPlatform::default());
        let first = fx.queue.submit(reply("A")).await.unwrap();
        let second = fx.queue.submit(reply("A")).await.unwrap();
        fx.queue.approve(&first.id, None).await.unwrap();
        fx.queue.approve(&second.id, None).await.unwrap();

        fx.queue.publish(&first.id).await.unwrap();
        let outcome = fx.queue.publish(&second.id).await.unwrap();

        match outcome {
            PublishOutcome::AlreadyHandled { draft, winner } => {
                assert_eq!(winner, first.id);
                assert_eq!(draft.status, DraftStatus::Posted);
                assert!(draft.note.is_some());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(fx.platform.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_publish_releases_claim_and_keeps_draft() {
        let fx = fixture(CountingPlatform {
            fail: true,
            ..Default::default()
        });
        let draft = fx.queue.submit(reply("A")).await.unwrap();
        fx.queue.approve(&draft.id, None).await.unwrap();

        let err = fx.queue.publish(&draft.id).await.unwrap_err();
        assert!(matches!(err, ApprovalError::Publish(_)));
        assert!(fx.storage.get_reply(&ExternalId::from("A")).await.unwrap().is_none());
        assert_eq!(fx.queue.get(&draft.id).await.unwrap().status, DraftStatus::Approved);

        let day_ago = chrono::Utc::now() - chrono::Duration::days(1);
        assert_eq!(fx.storage.count_events_since("post", day_ago).await.unwrap(), 0);
        assert!(fx.storage.claim_draft_publish(&draft.id, chrono::Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn held_publish_claim_keeps_the_platform_untouched() {
        let fx = fixture(CountingPlatform::default());
        let draft = fx.queue.submit(Draft::timeline("morning", chrono::Utc::now())).await.unwrap();
        fx.queue.approve(&draft.id, None).await.unwrap();
        assert!(fx.storage.claim_draft_publish(&draft.id, chrono::Utc::now()).await.unwrap());

        let err = fx.queue.publish(&draft.id).await.unwrap_err();
        assert!(matches!(err, ApprovalError::PublishInProgress(id) if id == draft.id));
        assert_eq!(fx.platform.calls.load(Ordering::SeqCst), 0);
        assert!(fx.queue.publishable(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn posted_draft_keeps_its_claim() {
        let fx = fixture(CountingPlatform::default());
        let draft = fx.queue.submit(Draft::timeline("morning", chrono::Utc::now())).await.unwrap();
        fx.queue.approve(&draft.id, None).await.unwrap();
        fx.queue.publish(&draft.id).await.unwrap();

        assert!(!fx.storage.claim_draft_publish(&draft.id, chrono::Utc::now()).await.unwrap());
        let err = fx.queue.publish(&draft.id).await.unwrap_err();
        assert!(matches!(
            err,
            ApprovalError::AlreadyFinalized {
                status: DraftStatus::Posted,
                ..
            }
        ));
        assert_eq!(fx.platform.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_draft_is_not_found() {
        let fx = fixture(CountingPlatform::default());
        let err = fx.queue.approve(&DraftId::generate(), None).await.unwrap_err();
        assert!(matches!(err, ApprovalError::NotFound(_)));
    }
}
