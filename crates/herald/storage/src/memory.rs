//! In-memory reference implementation of the Herald storage traits.
//!
//! Every conditional write happens under a single write guard, so the
//! uniqueness and claim semantics match the PostgreSQL backend for callers
//! sharing one instance. Suitable for development and tests only.

use crate::model::{DraftCounts, InboxCounts, LeaseRecord, RateCap};
use crate::traits::*;
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_types::{
    Draft, DraftId, DraftStatus, ExternalId, HolderId, InboxItem, Memory, MemoryKind,
    OutboundPost, PostId, PostStatus, ReplyLogEntry, SettingRecord, StyleVersion, StyleVersionId,
    Thread,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

type InboxKey = (String, ExternalId);

/// In-memory Herald storage adapter.
#[derive(Debug, Default)]
pub struct InMemoryHeraldStorage {
    inbox: RwLock<HashMap<InboxKey, InboxItem>>,
    outbound: RwLock<HashMap<PostId, OutboundPost>>,
    drafts: RwLock<HashMap<DraftId, Draft>>,
    publish_claims: RwLock<HashMap<DraftId, DateTime<Utc>>>,
    threads: RwLock<HashMap<String, Thread>>,
    replies: RwLock<HashMap<ExternalId, ReplyLogEntry>>,
    memories: RwLock<Vec<Memory>>,
    styles: RwLock<HashMap<StyleVersionId, StyleVersion>>,
    settings: RwLock<HashMap<String, SettingRecord>>,
    cursors: RwLock<HashMap<String, String>>,
    events: RwLock<EventLog>,
    leases: RwLock<LeaseTable>,
}

#[derive(Debug, Default)]
struct EventLog {
    rows: Vec<CounterEvent>,
    next_id: u64,
}

#[derive(Debug)]
struct CounterEvent {
    id: u64,
    class: String,
    at: DateTime<Utc>,
}

impl EventLog {
    fn push(&mut self, class: &str, at: DateTime<Utc>) -> u64 {
        self.next_id += 1;
        self.rows.push(CounterEvent { id: self.next_id, class: class.to_string(), at });
        self.next_id
    }

    fn count_since(&self, class: &str, since: DateTime<Utc>) -> u64 {
        self.rows.iter().filter(|e| e.class == class && e.at > since).count() as u64
    }
}

#[derive(Debug, Default)]
struct LeaseTable {
    held: HashMap<String, LeaseRecord>,
    tokens: HashMap<String, u64>,
}

impl InMemoryHeraldStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn page<T>(items: Vec<T>, window: QueryWindow) -> Vec<T> {
    let limit = if window.limit == 0 { usize::MAX } else { window.limit };
    items.into_iter().skip(window.offset).take(limit).collect()
}

#[async_trait]
impl InboxStore for InMemoryHeraldStorage {
    async fn insert_inbox(&self, item: InboxItem) -> StorageResult<bool> {
        let mut guard = self.inbox.write().await;
        let key = (item.source.clone(), item.external_id.clone());
        if guard.contains_key(&key) {
            return Ok(false);
        }
        guard.insert(key, item);
        Ok(true)
    }

    async fn inbox_exists(&self, source: &str, external_id: &ExternalId) -> StorageResult<bool> {
        let guard = self.inbox.read().await;
        Ok(guard.contains_key(&(source.to_string(), external_id.clone())))
    }

    async fn get_inbox(
        &self,
        source: &str,
        external_id: &ExternalId,
    ) -> StorageResult<Option<InboxItem>> {
        let guard = self.inbox.read().await;
        Ok(guard.get(&(source.to_string(), external_id.clone())).cloned())
    }

    async fn mark_inbox_processed(
        &self,
        source: &str,
        external_id: &ExternalId,
    ) -> StorageResult<()> {
        let mut guard = self.inbox.write().await;
        let item = guard
            .get_mut(&(source.to_string(), external_id.clone()))
            .ok_or_else(|| StorageError::NotFound(format!("inbox item {}/{}", source, external_id)))?;
        item.processed = true;
        Ok(())
    }

    async fn list_unprocessed_inbox(
        &self,
        source: &str,
        limit: usize,
    ) -> StorageResult<Vec<InboxItem>> {
        let guard = self.inbox.read().await;
        let mut rows: Vec<InboxItem> = guard
            .values()
            .filter(|item| item.source == source && !item.processed)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.received_at
                .cmp(&b.received_at)
                .then_with(|| a.external_id.cmp(&b.external_id))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn list_unlearned_inbox(&self, limit: usize) -> StorageResult<Vec<InboxItem>> {
        let guard = self.inbox.read().await;
        let mut rows: Vec<InboxItem> = guard
            .values()
            .filter(|item| !item.learning_processed)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.received_at
                .cmp(&b.received_at)
                .then_with(|| a.external_id.cmp(&b.external_id))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn claim_inbox_learning(
        &self,
        source: &str,
        external_id: &ExternalId,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let mut guard = self.inbox.write().await;
        let item = guard
            .get_mut(&(source.to_string(), external_id.clone()))
            .ok_or_else(|| StorageError::NotFound(format!("inbox item {}/{}", source, external_id)))?;
        if item.learning_processed {
            return Ok(false);
        }
        item.learning_processed = true;
        item.learning_processed_at = Some(at);
        Ok(true)
    }

    async fn inbox_counts(&self) -> StorageResult<InboxCounts> {
        let guard = self.inbox.read().await;
        let mut counts = InboxCounts::default();
        for item in guard.values() {
            counts.total += 1;
            if !item.processed {
                counts.unprocessed += 1;
            }
            if !item.learning_processed {
                counts.unlearned += 1;
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl OutboundStore for InMemoryHeraldStorage {
    async fn insert_outbound(&self, post: OutboundPost) -> StorageResult<()> {
        let mut guard = self.outbound.write().await;
        if guard.contains_key(&post.id) {
            return Err(StorageError::Conflict(format!("outbound post {} already exists", post.id)));
        }
        if let Some(external_id) = &post.external_id {
            if guard.values().any(|p| p.external_id.as_ref() == Some(external_id)) {
                return Err(StorageError::Conflict(format!(
                    "external post id {} already recorded",
                    external_id
                )));
            }
        }
        guard.insert(post.id, post);
        Ok(())
    }

    async fn get_outbound(&self, id: &PostId) -> StorageResult<Option<OutboundPost>> {
        Ok(self.outbound.read().await.get(id).cloned())
    }

    async fn list_recent_posted(&self, limit: usize) -> StorageResult<Vec<OutboundPost>> {
        let guard = self.outbound.read().await;
        let mut rows: Vec<OutboundPost> = guard
            .values()
            .filter(|p| p.status == PostStatus::Posted)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.posted_at.cmp(&a.posted_at).then_with(|| b.created_at.cmp(&a.created_at)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn list_unlearned_outbound(&self, limit: usize) -> StorageResult<Vec<OutboundPost>> {
        let guard = self.outbound.read().await;
        let mut rows: Vec<OutboundPost> = guard
            .values()
            .filter(|p| p.status == PostStatus::Posted && !p.learning_processed)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn claim_outbound_learning(&self, id: &PostId, at: DateTime<Utc>) -> StorageResult<bool> {
        let mut guard = self.outbound.write().await;
        let post = guard
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("outbound post {}", id)))?;
        if post.learning_processed {
            return Ok(false);
        }
        post.learning_processed = true;
        post.learning_processed_at = Some(at);
        Ok(true)
    }

    async fn count_outbound(&self) -> StorageResult<u64> {
        Ok(self.outbound.read().await.len() as u64)
    }
}

#[async_trait]
impl DraftStore for InMemoryHeraldStorage {
    async fn create_draft(&self, draft: Draft) -> StorageResult<()> {
        let mut guard = self.drafts.write().await;
        if guard.contains_key(&draft.id) {
            return Err(StorageError::Conflict(format!("draft {} already exists", draft.id)));
        }
        guard.insert(draft.id, draft);
        Ok(())
    }

    async fn get_draft(&self, id: &DraftId) -> StorageResult<Option<Draft>> {
        Ok(self.drafts.read().await.get(id).cloned())
    }

    async fn list_drafts(
        &self,
        status: Option<DraftStatus>,
        window: QueryWindow,
    ) -> StorageResult<Vec<Draft>> {
        let guard = self.drafts.read().await;
        let mut rows: Vec<Draft> = guard
            .values()
            .filter(|d| status.map_or(true, |s| d.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(page(rows, window))
    }

    async fn list_drafts_oldest_first(
        &self,
        status: DraftStatus,
        limit: usize,
    ) -> StorageResult<Vec<Draft>> {
        let guard = self.drafts.read().await;
        let claims = self.publish_claims.read().await;
        let mut rows: Vec<Draft> = guard
            .values()
            .filter(|d| d.status == status && !claims.contains_key(&d.id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn update_draft(&self, draft: Draft, expected_from: DraftStatus) -> StorageResult<()> {
        let mut guard = self.drafts.write().await;
        let current = guard
            .get_mut(&draft.id)
            .ok_or_else(|| StorageError::NotFound(format!("draft {}", draft.id)))?;

        if current.status != expected_from {
            return Err(StorageError::InvariantViolation(format!(
                "draft {} is {}, expected {}",
                draft.id, current.status, expected_from
            )));
        }
        *current = draft;
        Ok(())
    }

    async fn draft_counts(&self) -> StorageResult<DraftCounts> {
        let guard = self.drafts.read().await;
        let mut counts = DraftCounts::empty();
        for draft in guard.values() {
            counts.bump(draft.status);
        }
        Ok(counts)
    }

    async fn claim_draft_publish(&self, id: &DraftId, at: DateTime<Utc>) -> StorageResult<bool> {
        let mut guard = self.publish_claims.write().await;
        if guard.contains_key(id) {
            return Ok(false);
        }
        guard.insert(*id, at);
        Ok(true)
    }

    async fn release_draft_publish(&self, id: &DraftId) -> StorageResult<bool> {
        Ok(self.publish_claims.write().await.remove(id).is_some())
    }
}

#[async_trait]
impl ThreadStore for InMemoryHeraldStorage {
    async fn get_thread(&self, conversation_id: &str) -> StorageResult<Option<Thread>> {
        Ok(self.threads.read().await.get(conversation_id).cloned())
    }

    async fn record_thread_reply(
        &self,
        conversation_id: &str,
        max_replies: u32,
        at: DateTime<Utc>,
    ) -> StorageResult<Thread> {
        let mut guard = self.threads.write().await;
        let thread = guard
            .entry(conversation_id.to_string())
            .or_insert_with(|| Thread::new(conversation_id, at));
        thread.reply_count = thread.reply_count.saturating_add(1);
        if max_replies > 0 && thread.reply_count >= max_replies {
            thread.stopped = true;
        }
        thread.updated_at = at;
        Ok(thread.clone())
    }

    async fn stop_thread(&self, conversation_id: &str, at: DateTime<Utc>) -> StorageResult<Thread> {
        let mut guard = self.threads.write().await;
        let thread = guard
            .entry(conversation_id.to_string())
            .or_insert_with(|| Thread::new(conversation_id, at));
        thread.stopped = true;
        thread.updated_at = at;
        Ok(thread.clone())
    }

    async fn count_stopped_threads(&self) -> StorageResult<u64> {
        Ok(self.threads.read().await.values().filter(|t| t.stopped).count() as u64)
    }
}

#[async_trait]
impl ReplyLogStore for InMemoryHeraldStorage {
    async fn claim_reply(&self, entry: ReplyLogEntry) -> StorageResult<bool> {
        let mut guard = self.replies.write().await;
        if guard.contains_key(&entry.reply_to_id) {
            return Ok(false);
        }
        guard.insert(entry.reply_to_id.clone(), entry);
        Ok(true)
    }

    async fn complete_reply(
        &self,
        reply_to_id: &ExternalId,
        draft_id: &DraftId,
        reply_external_id: &ExternalId,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let mut guard = self.replies.write().await;
        let entry = guard
            .get_mut(reply_to_id)
            .ok_or_else(|| StorageError::NotFound(format!("reply claim for {}", reply_to_id)))?;
        if &entry.draft_id != draft_id {
            return Err(StorageError::InvariantViolation(format!(
                "reply claim for {} is owned by {}",
                reply_to_id, entry.draft_id
            )));
        }
        entry.reply_external_id = Some(reply_external_id.clone());
        entry.completed_at = Some(at);
        Ok(())
    }

    async fn release_reply(
        &self,
        reply_to_id: &ExternalId,
        draft_id: &DraftId,
    ) -> StorageResult<bool> {
        let mut guard = self.replies.write().await;
        let owned_and_open = guard
            .get(reply_to_id)
            .map(|entry| &entry.draft_id == draft_id && !entry.is_complete())
            .unwrap_or(false);
        if owned_and_open {
            guard.remove(reply_to_id);
        }
        Ok(owned_and_open)
    }

    async fn get_reply(&self, reply_to_id: &ExternalId) -> StorageResult<Option<ReplyLogEntry>> {
        Ok(self.replies.read().await.get(reply_to_id).cloned())
    }

    async fn count_replies(&self) -> StorageResult<u64> {
        Ok(self.replies.read().await.len() as u64)
    }
}

#[async_trait]
impl MemoryStore for InMemoryHeraldStorage {
    async fn insert_memory(&self, memory: Memory) -> StorageResult<()> {
        self.memories.write().await.push(memory);
        Ok(())
    }

    async fn list_memories(
        &self,
        kind: Option<MemoryKind>,
        window: QueryWindow,
    ) -> StorageResult<Vec<Memory>> {
        let guard = self.memories.read().await;
        let rows: Vec<Memory> = guard
            .iter()
            .rev()
            .filter(|m| kind.map_or(true, |k| m.kind == k))
            .cloned()
            .collect();
        Ok(page(rows, window))
    }

    async fn count_memories(&self) -> StorageResult<u64> {
        Ok(self.memories.read().await.len() as u64)
    }
}

#[async_trait]
impl StyleStore for InMemoryHeraldStorage {
    async fn insert_style_version(&self, version: StyleVersion) -> StorageResult<()> {
        if version.is_active {
            return Err(StorageError::InvalidInput(format!(
                "style version {} cannot be inserted active",
                version.id
            )));
        }
        let mut guard = self.styles.write().await;
        if guard.contains_key(&version.id) {
            return Err(StorageError::Conflict(format!(
                "style version {} already exists",
                version.id
            )));
        }
        guard.insert(version.id.clone(), version);
        Ok(())
    }

    async fn list_style_versions(&self, window: QueryWindow) -> StorageResult<Vec<StyleVersion>> {
        let guard = self.styles.read().await;
        let mut rows: Vec<StyleVersion> = guard.values().cloned().collect();
        rows.sort_by(|a, b| b.generated_at.cmp(&a.generated_at).then_with(|| b.id.cmp(&a.id)));
        Ok(page(rows, window))
    }

    async fn get_style_version(&self, id: &StyleVersionId) -> StorageResult<Option<StyleVersion>> {
        Ok(self.styles.read().await.get(id).cloned())
    }

    async fn active_style_version(&self) -> StorageResult<Option<StyleVersion>> {
        Ok(self.styles.read().await.values().find(|v| v.is_active).cloned())
    }

    async fn set_active_style(
        &self,
        id: &StyleVersionId,
        at: DateTime<Utc>,
    ) -> StorageResult<StyleVersion> {
        let mut guard = self.styles.write().await;
        if !guard.contains_key(id) {
            return Err(StorageError::NotFound(format!("style version {}", id)));
        }

        let mut activated = None;
        for version in guard.values_mut() {
            if &version.id == id {
                version.is_active = true;
                version.activated_at = Some(at);
                activated = Some(version.clone());
            } else {
                version.is_active = false;
            }
        }
        activated.ok_or_else(|| StorageError::NotFound(format!("style version {}", id)))
    }
}

#[async_trait]
impl SettingsStorage for InMemoryHeraldStorage {
    async fn list_settings(&self) -> StorageResult<Vec<SettingRecord>> {
        let guard = self.settings.read().await;
        let mut rows: Vec<SettingRecord> = guard.values().cloned().collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(rows)
    }

    async fn get_setting(&self, key: &str) -> StorageResult<Option<SettingRecord>> {
        Ok(self.settings.read().await.get(key).cloned())
    }

    async fn upsert_setting(&self, record: SettingRecord) -> StorageResult<()> {
        self.settings.write().await.insert(record.key.clone(), record);
        Ok(())
    }
}

#[async_trait]
impl CursorStore for InMemoryHeraldStorage {
    async fn get_cursor(&self, source: &str) -> StorageResult<Option<String>> {
        Ok(self.cursors.read().await.get(source).cloned())
    }

    async fn set_cursor(&self, source: &str, cursor: &str, _at: DateTime<Utc>) -> StorageResult<()> {
        self.cursors
            .write()
            .await
            .insert(source.to_string(), cursor.to_string());
        Ok(())
    }
}

#[async_trait]
impl CounterStore for InMemoryHeraldStorage {
    async fn record_event(&self, class: &str, at: DateTime<Utc>) -> StorageResult<()> {
        self.events.write().await.push(class, at);
        Ok(())
    }

    async fn reserve_event(
        &self,
        class: &str,
        at: DateTime<Utc>,
        caps: &[RateCap],
    ) -> StorageResult<Option<u64>> {
        let mut guard = self.events.write().await;
        if caps.iter().any(|cap| guard.count_since(class, cap.since) >= cap.max) {
            return Ok(None);
        }
        Ok(Some(guard.push(class, at)))
    }

    async fn cancel_event(&self, id: u64) -> StorageResult<bool> {
        let mut guard = self.events.write().await;
        let before = guard.rows.len();
        guard.rows.retain(|e| e.id != id);
        Ok(guard.rows.len() < before)
    }

    async fn count_events_since(&self, class: &str, since: DateTime<Utc>) -> StorageResult<u64> {
        Ok(self.events.read().await.count_since(class, since))
    }

    async fn prune_events_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        let mut guard = self.events.write().await;
        let before = guard.rows.len();
        guard.rows.retain(|e| e.at > cutoff);
        Ok((before - guard.rows.len()) as u64)
    }
}

#[async_trait]
impl LeaseStore for InMemoryHeraldStorage {
    async fn try_acquire_lease(
        &self,
        key: &str,
        holder: &HolderId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<LeaseRecord>> {
        let ttl = ttl_to_chrono(ttl)?;
        let mut guard = self.leases.write().await;

        if let Some(existing) = guard.held.get(key) {
            if !existing.is_expired(now) {
                return Ok(None);
            }
        }

        let token = guard.tokens.entry(key.to_string()).or_insert(0);
        *token += 1;
        let record = LeaseRecord {
            key: key.to_string(),
            holder: holder.clone(),
            acquired_at: now,
            expires_at: now + ttl,
            fencing_token: *token,
        };
        guard.held.insert(key.to_string(), record.clone());
        Ok(Some(record))
    }

    async fn renew_lease(
        &self,
        key: &str,
        holder: &HolderId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<LeaseRecord>> {
        let ttl = ttl_to_chrono(ttl)?;
        let mut guard = self.leases.write().await;
        match guard.held.get_mut(key) {
            Some(record) if record.is_held_by(holder, now) => {
                record.expires_at = now + ttl;
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn release_lease(&self, key: &str, holder: &HolderId) -> StorageResult<bool> {
        let mut guard = self.leases.write().await;
        let owned = guard
            .held
            .get(key)
            .map(|record| &record.holder == holder)
            .unwrap_or(false);
        if owned {
            guard.held.remove(key);
        }
        Ok(owned)
    }

    async fn get_lease(&self, key: &str) -> StorageResult<Option<LeaseRecord>> {
        Ok(self.leases.read().await.held.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use herald_types::{PostType, RawItem, StyleVersionPayload};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap()
    }

    fn inbox(id: &str, offset_secs: i64) -> InboxItem {
        let raw = RawItem::new(Some(id), "author-1", format!("hello {}", id));
        InboxItem::from_raw("x", &raw, 0.9, t0() + chrono::Duration::seconds(offset_secs))
    }

    #[tokio::test]
    async fn inbox_insert_is_unique_per_source() {
        let store = InMemoryHeraldStorage::new();
        assert!(store.insert_inbox(inbox("A", 0)).await.unwrap());
        assert!(!store.insert_inbox(inbox("A", 5)).await.unwrap());

        let mut other_source = inbox("A", 0);
        other_source.source = "y".to_string();
        assert!(store.insert_inbox(other_source).await.unwrap());

        assert_eq!(store.inbox_counts().await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn unprocessed_listing_is_per_source_and_oldest_first() {
        let store = InMemoryHeraldStorage::new();
        store.insert_inbox(inbox("B", 10)).await.unwrap();
        store.insert_inbox(inbox("A", 0)).await.unwrap();
        store.insert_inbox(inbox("C", 20)).await.unwrap();
        store.mark_inbox_processed("x", &ExternalId::from("C")).await.unwrap();

        let rows = store.list_unprocessed_inbox("x", 10).await.unwrap();
        let ids: Vec<&str> = rows.iter().map(|item| item.external_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert!(store.list_unprocessed_inbox("y", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn learning_claim_flips_once() {
        let store = InMemoryHeraldStorage::new();
        store.insert_inbox(inbox("B", 10)).await.unwrap();
        store.insert_inbox(inbox("A", 0)).await.unwrap();

        let unlearned = store.list_unlearned_inbox(10).await.unwrap();
        assert_eq!(unlearned[0].external_id.as_str(), "A");

        let key = ExternalId::from("A");
        assert!(store.claim_inbox_learning("x", &key, t0()).await.unwrap());
        assert!(!store.claim_inbox_learning("x", &key, t0()).await.unwrap());

        let item = store.get_inbox("x", &key).await.unwrap().unwrap();
        assert!(item.learning_processed);
        assert_eq!(item.learning_processed_at, Some(t0()));
        assert_eq!(store.list_unlearned_inbox(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn draft_update_is_conditional_on_status() {
        let store = InMemoryHeraldStorage::new();
        let draft = Draft::timeline("gm", t0());
        let id = draft.id;
        store.create_draft(draft.clone()).await.unwrap();

        let mut approved = draft.clone();
        approved.status = DraftStatus::Approved;
        store.update_draft(approved.clone(), DraftStatus::Pending).await.unwrap();

        let err = store.update_draft(approved, DraftStatus::Pending).await.unwrap_err();
        assert!(matches!(err, StorageError::InvariantViolation(_)));

        let counts = store.draft_counts().await.unwrap();
        assert_eq!(counts.get(DraftStatus::Approved), 1);
        assert_eq!(counts.get(DraftStatus::Pending), 0);
        assert_eq!(store.get_draft(&id).await.unwrap().unwrap().status, DraftStatus::Approved);
    }

    #[tokio::test]
    async fn reply_claim_is_exclusive_and_releasable() {
        let store = InMemoryHeraldStorage::new();
        let target = ExternalId::from("A");
        let first = DraftId::generate();
        let second = DraftId::generate();

        assert!(store
            .claim_reply(ReplyLogEntry::claim(target.clone(), first, t0()))
            .await
            .unwrap());
        assert!(!store
            .claim_reply(ReplyLogEntry::claim(target.clone(), second, t0()))
            .await
            .unwrap());

        // Only the owner can release an open claim.
        assert!(!store.release_reply(&target, &second).await.unwrap());
        assert!(store.release_reply(&target, &first).await.unwrap());

        assert!(store
            .claim_reply(ReplyLogEntry::claim(target.clone(), second, t0()))
            .await
            .unwrap());
        store
            .complete_reply(&target, &second, &ExternalId::from("R1"), t0())
            .await
            .unwrap();
        assert!(!store.release_reply(&target, &second).await.unwrap());
        assert_eq!(store.count_replies().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn thread_stops_at_max_replies() {
        let store = InMemoryHeraldStorage::new();
        let first = store.record_thread_reply("conv-1", 2, t0()).await.unwrap();
        assert!(!first.stopped);
        let second = store.record_thread_reply("conv-1", 2, t0()).await.unwrap();
        assert!(second.stopped);
        assert_eq!(second.reply_count, 2);
        assert_eq!(store.count_stopped_threads().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn style_activation_keeps_single_active() {
        let store = InMemoryHeraldStorage::new();
        let a = StyleVersion::proposal(StyleVersionPayload::default(), 30, t0());
        let b = StyleVersion::proposal(
            StyleVersionPayload::default(),
            31,
            t0() + chrono::Duration::hours(1),
        );
        store.insert_style_version(a.clone()).await.unwrap();
        store.insert_style_version(b.clone()).await.unwrap();

        store.set_active_style(&a.id, t0()).await.unwrap();
        store.set_active_style(&b.id, t0()).await.unwrap();

        let versions = store.list_style_versions(QueryWindow::default()).await.unwrap();
        assert_eq!(versions.iter().filter(|v| v.is_active).count(), 1);
        assert_eq!(store.active_style_version().await.unwrap().unwrap().id, b.id);

        let mut active = a.clone();
        active.is_active = true;
        assert!(matches!(
            store.insert_style_version(active).await,
            Err(StorageError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn lease_is_exclusive_until_expiry() {
        let store = InMemoryHeraldStorage::new();
        let a = HolderId::new("a");
        let b = HolderId::new("b");
        let ttl = Duration::from_secs(300);

        let lease = store.try_acquire_lease("style", &a, ttl, t0()).await.unwrap().unwrap();
        assert_eq!(lease.fencing_token, 1);
        assert!(store.try_acquire_lease("style", &b, ttl, t0()).await.unwrap().is_none());

        // Non-owners cannot renew or release.
        assert!(store.renew_lease("style", &b, ttl, t0()).await.unwrap().is_none());
        assert!(!store.release_lease("style", &b).await.unwrap());

        let later = t0() + chrono::Duration::seconds(300);
        let taken = store.try_acquire_lease("style", &b, ttl, later).await.unwrap().unwrap();
        assert_eq!(taken.holder, b);
        assert_eq!(taken.fencing_token, 2);
        assert!(store.renew_lease("style", &a, ttl, later).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn counters_count_and_prune() {
        let store = InMemoryHeraldStorage::new();
        for minutes in [0, 30, 90] {
            store
                .record_event("post", t0() + chrono::Duration::minutes(minutes))
                .await
                .unwrap();
        }
        let now = t0() + chrono::Duration::minutes(95);
        let hour_ago = now - chrono::Duration::hours(1);
        assert_eq!(store.count_events_since("post", hour_ago).await.unwrap(), 1);
        assert_eq!(store.count_events_since("reply", hour_ago).await.unwrap(), 0);
        assert_eq!(store.prune_events_before(hour_ago).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn reserve_respects_every_cap_and_cancel_frees_the_slot() {
        let store = InMemoryHeraldStorage::new();
        let now = t0() + chrono::Duration::hours(3);
        let caps = [
            RateCap { since: now - chrono::Duration::hours(1), max: 1 },
            RateCap { since: now - chrono::Duration::days(1), max: 2 },
        ];
        store.record_event("post", t0()).await.unwrap();

        let first = store.reserve_event("post", now, &caps).await.unwrap();
        assert!(first.is_some());
        assert_eq!(store.reserve_event("post", now, &caps).await.unwrap(), None);
        assert_eq!(store.count_events_since("post", t0() - chrono::Duration::days(1)).await.unwrap(), 2);

        assert!(store.cancel_event(first.unwrap()).await.unwrap());
        assert!(!store.cancel_event(first.unwrap()).await.unwrap());
        assert!(store.reserve_event("post", now, &caps).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn publish_claim_is_exclusive_and_hides_the_draft() {
        let store = InMemoryHeraldStorage::new();
        let draft = Draft::new("timeline note", PostType::Timeline, t0());
        let id = draft.id;
        store.create_draft(draft).await.unwrap();
        assert_eq!(store.list_drafts_oldest_first(DraftStatus::Pending, 10).await.unwrap().len(), 1);

        assert!(store.claim_draft_publish(&id, t0()).await.unwrap());
        assert!(!store.claim_draft_publish(&id, t0()).await.unwrap());
        assert!(store.list_drafts_oldest_first(DraftStatus::Pending, 10).await.unwrap().is_empty());

        assert!(store.release_draft_publish(&id).await.unwrap());
        assert!(store.claim_draft_publish(&id, t0()).await.unwrap());
    }

    #[tokio::test]
    async fn outbound_learning_only_covers_posted_rows() {
        let store = InMemoryHeraldStorage::new();
        let mut draft = Draft::new("thread reply", PostType::Reply, t0());
        draft.reply_to_id = Some(ExternalId::from("A"));
        let post = OutboundPost::posted_from(&draft, ExternalId::from("R1"), t0());
        let id = post.id;
        store.insert_outbound(post).await.unwrap();

        assert_eq!(store.list_unlearned_outbound(10).await.unwrap().len(), 1);
        assert!(store.claim_outbound_learning(&id, t0()).await.unwrap());
        assert!(store.list_unlearned_outbound(10).await.unwrap().is_empty());
        assert_eq!(store.list_recent_posted(10).await.unwrap().len(), 1);
    }
}
