use crate::model::{DraftCounts, InboxCounts, LeaseRecord, RateCap};
use crate::StorageResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_types::{
    Draft, DraftId, DraftStatus, ExternalId, HolderId, InboxItem, Memory, MemoryKind,
    OutboundPost, PostId, ReplyLogEntry, SettingRecord, StyleVersion, StyleVersionId, Thread,
};
use std::time::Duration;

/// Generic query window for paged reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

impl QueryWindow {
    pub fn first(limit: usize) -> Self {
        Self { limit, offset: 0 }
    }
}

/// Inbound items, unique on `(source, external_id)`.
#[async_trait]
pub trait InboxStore: Send + Sync {
    /// Insert an item. Returns `false` when the key is already stored.
    async fn insert_inbox(&self, item: InboxItem) -> StorageResult<bool>;

    async fn inbox_exists(&self, source: &str, external_id: &ExternalId) -> StorageResult<bool>;

    async fn get_inbox(
        &self,
        source: &str,
        external_id: &ExternalId,
    ) -> StorageResult<Option<InboxItem>>;

    async fn mark_inbox_processed(&self, source: &str, external_id: &ExternalId)
        -> StorageResult<()>;

    /// Rows of `source` with `processed = false`, oldest first.
    async fn list_unprocessed_inbox(&self, source: &str, limit: usize)
        -> StorageResult<Vec<InboxItem>>;

    /// Rows with `learning_processed = false`, oldest first.
    async fn list_unlearned_inbox(&self, limit: usize) -> StorageResult<Vec<InboxItem>>;

    /// Flip `learning_processed` false→true. Returns `false` if another
    /// caller already claimed the row.
    async fn claim_inbox_learning(
        &self,
        source: &str,
        external_id: &ExternalId,
        at: DateTime<Utc>,
    ) -> StorageResult<bool>;

    async fn inbox_counts(&self) -> StorageResult<InboxCounts>;
}

/// Published outbound posts.
#[async_trait]
pub trait OutboundStore: Send + Sync {
    async fn insert_outbound(&self, post: OutboundPost) -> StorageResult<()>;

    async fn get_outbound(&self, id: &PostId) -> StorageResult<Option<OutboundPost>>;

    /// Posted rows, newest first.
    async fn list_recent_posted(&self, limit: usize) -> StorageResult<Vec<OutboundPost>>;

    /// Posted rows with `learning_processed = false`, oldest first.
    async fn list_unlearned_outbound(&self, limit: usize) -> StorageResult<Vec<OutboundPost>>;

    async fn claim_outbound_learning(&self, id: &PostId, at: DateTime<Utc>) -> StorageResult<bool>;

    async fn count_outbound(&self) -> StorageResult<u64>;
}

/// Approval-queue drafts.
#[async_trait]
pub trait DraftStore: Send + Sync {
    async fn create_draft(&self, draft: Draft) -> StorageResult<()>;

    async fn get_draft(&self, id: &DraftId) -> StorageResult<Option<Draft>>;

    /// Newest first, optionally filtered by status.
    async fn list_drafts(
        &self,
        status: Option<DraftStatus>,
        window: QueryWindow,
    ) -> StorageResult<Vec<Draft>>;

    /// Oldest first, skipping drafts under a publish claim; used by the publisher sweep.
    async fn list_drafts_oldest_first(
        &self,
        status: DraftStatus,
        limit: usize,
    ) -> StorageResult<Vec<Draft>>;

    /// Replace a draft only if its stored status still equals `expected_from`.
    async fn update_draft(&self, draft: Draft, expected_from: DraftStatus) -> StorageResult<()>;

    async fn draft_counts(&self) -> StorageResult<DraftCounts>;

    /// Take the single publish claim for a draft. Returns `false` if a
    /// claim already exists, whoever holds it.
    async fn claim_draft_publish(&self, id: &DraftId, at: DateTime<Utc>) -> StorageResult<bool>;

    /// Drop a publish claim after a failed attempt. Returns whether a claim was removed.
    async fn release_draft_publish(&self, id: &DraftId) -> StorageResult<bool>;
}

/// Per-conversation engagement tracking.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    async fn get_thread(&self, conversation_id: &str) -> StorageResult<Option<Thread>>;

    /// Increment the reply count, stopping the thread once it reaches
    /// `max_replies`.
    async fn record_thread_reply(
        &self,
        conversation_id: &str,
        max_replies: u32,
        at: DateTime<Utc>,
    ) -> StorageResult<Thread>;

    async fn stop_thread(&self, conversation_id: &str, at: DateTime<Utc>) -> StorageResult<Thread>;

    async fn count_stopped_threads(&self) -> StorageResult<u64>;
}

/// At-most-once reply log, unique on `reply_to_id`.
#[async_trait]
pub trait ReplyLogStore: Send + Sync {
    /// Insert a claim row. Returns `false` if any row already exists for
    /// the target.
    async fn claim_reply(&self, entry: ReplyLogEntry) -> StorageResult<bool>;

    /// Record the published reply id on a claim owned by `draft_id`.
    async fn complete_reply(
        &self,
        reply_to_id: &ExternalId,
        draft_id: &DraftId,
        reply_external_id: &ExternalId,
        at: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Drop an incomplete claim owned by `draft_id`. Returns whether a row was removed.
    async fn release_reply(&self, reply_to_id: &ExternalId, draft_id: &DraftId)
        -> StorageResult<bool>;

    async fn get_reply(&self, reply_to_id: &ExternalId) -> StorageResult<Option<ReplyLogEntry>>;

    async fn count_replies(&self) -> StorageResult<u64>;
}

/// Append-only learning records.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn insert_memory(&self, memory: Memory) -> StorageResult<()>;

    /// Newest first, optionally filtered by kind.
    async fn list_memories(
        &self,
        kind: Option<MemoryKind>,
        window: QueryWindow,
    ) -> StorageResult<Vec<Memory>>;

    async fn count_memories(&self) -> StorageResult<u64>;
}

/// Style proposals and the single active version.
#[async_trait]
pub trait StyleStore: Send + Sync {
    /// Insert a proposal. Rejects rows that arrive already active.
    async fn insert_style_version(&self, version: StyleVersion) -> StorageResult<()>;

    /// Newest first by generation time.
    async fn list_style_versions(&self, window: QueryWindow) -> StorageResult<Vec<StyleVersion>>;

    async fn get_style_version(&self, id: &StyleVersionId) -> StorageResult<Option<StyleVersion>>;

    async fn active_style_version(&self) -> StorageResult<Option<StyleVersion>>;

    /// Make `id` the only active version in one step.
    async fn set_active_style(
        &self,
        id: &StyleVersionId,
        at: DateTime<Utc>,
    ) -> StorageResult<StyleVersion>;
}

/// Runtime setting overrides.
#[async_trait]
pub trait SettingsStorage: Send + Sync {
    async fn list_settings(&self) -> StorageResult<Vec<SettingRecord>>;

    async fn get_setting(&self, key: &str) -> StorageResult<Option<SettingRecord>>;

    async fn upsert_setting(&self, record: SettingRecord) -> StorageResult<()>;
}

/// Durable poll cursors keyed by source.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn get_cursor(&self, source: &str) -> StorageResult<Option<String>>;

    async fn set_cursor(&self, source: &str, cursor: &str, at: DateTime<Utc>) -> StorageResult<()>;
}

/// Timestamped events backing the rolling rate windows.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn record_event(&self, class: &str, at: DateTime<Utc>) -> StorageResult<()>;

    /// Record an event only if every cap still has room, checked and
    /// inserted as one step. Returns the event id, or `None` when a cap is full.
    async fn reserve_event(
        &self,
        class: &str,
        at: DateTime<Utc>,
        caps: &[RateCap],
    ) -> StorageResult<Option<u64>>;

    /// Remove a reserved event. Returns whether it existed.
    async fn cancel_event(&self, id: u64) -> StorageResult<bool>;

    /// Events of `class` strictly after `since`.
    async fn count_events_since(&self, class: &str, since: DateTime<Utc>) -> StorageResult<u64>;

    /// Delete events at or before `cutoff`. Returns the number removed.
    async fn prune_events_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64>;
}

/// Named TTL leases.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Set-if-absent-or-expired. `None` means another holder owns the key.
    async fn try_acquire_lease(
        &self,
        key: &str,
        holder: &HolderId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<LeaseRecord>>;

    /// Extend an unexpired lease owned by `holder`. `None` if not held.
    async fn renew_lease(
        &self,
        key: &str,
        holder: &HolderId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<LeaseRecord>>;

    /// Delete the lease if `holder` owns it. Returns whether it was removed.
    async fn release_lease(&self, key: &str, holder: &HolderId) -> StorageResult<bool>;

    async fn get_lease(&self, key: &str) -> StorageResult<Option<LeaseRecord>>;
}

/// Convenience trait for backends implementing the full Herald contract.
pub trait HeraldStorage:
    InboxStore
    + OutboundStore
    + DraftStore
    + ThreadStore
    + ReplyLogStore
    + MemoryStore
    + StyleStore
    + SettingsStorage
    + CursorStore
    + CounterStore
    + LeaseStore
    + Send
    + Sync
{
}

impl<T> HeraldStorage for T where
    T: InboxStore
        + OutboundStore
        + DraftStore
        + ThreadStore
        + ReplyLogStore
        + MemoryStore
        + StyleStore
        + SettingsStorage
        + CursorStore
        + CounterStore
        + LeaseStore
        + Send
        + Sync
{
}

pub(crate) fn ttl_to_chrono(ttl: Duration) -> StorageResult<chrono::Duration> {
    chrono::Duration::from_std(ttl)
        .map_err(|e| crate::StorageError::InvalidInput(format!("lease ttl out of range: {}", e)))
}
