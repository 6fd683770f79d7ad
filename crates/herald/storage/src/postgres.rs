//! PostgreSQL storage implementation
//!
//! Uniqueness and claim semantics are enforced by the database itself:
//! primary keys on the inbox and reply log, conditional `UPDATE`s for
//! learning claims and draft transitions, a partial unique index for the
//! single active style, and `INSERT .. ON CONFLICT .. WHERE` for leases.
//! Rate reservations serialize per event class on a transaction-scoped
//! advisory lock.

use crate::model::{DraftCounts, InboxCounts, LeaseRecord, RateCap};
use crate::traits::*;
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_types::{
    Draft, DraftId, DraftStatus, ExternalId, HolderId, InboxItem, Memory, MemoryKind,
    OutboundPost, PostId, ReplyLogEntry, SettingRecord, StyleVersion, StyleVersionId, Thread,
};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};
use std::time::Duration;

/// PostgreSQL-backed storage
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> StorageResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| StorageError::Serialization(format!("json serialize error: {}", e)))
}

fn from_json<T: serde::de::DeserializeOwned>(value: Value) -> StorageResult<T> {
    serde_json::from_value(value)
        .map_err(|e| StorageError::Serialization(format!("json deserialize error: {}", e)))
}

fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn limit(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn window_limit(window: QueryWindow) -> i64 {
    if window.limit == 0 {
        i64::MAX
    } else {
        limit(window.limit)
    }
}

impl PostgresStorage {
    /// Connect to PostgreSQL and initialize schema
    pub async fn new(
        url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect(url)
            .await
            .map_err(backend)?;

        let storage = Self { pool };
        storage.initialize_schema().await?;
        Ok(storage)
    }

    async fn initialize_schema(&self) -> StorageResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS inbox_items (
                source TEXT NOT NULL,
                external_id TEXT NOT NULL,
                received_at TIMESTAMPTZ NOT NULL,
                processed BOOLEAN NOT NULL DEFAULT FALSE,
                learning_processed BOOLEAN NOT NULL DEFAULT FALSE,
                learning_processed_at TIMESTAMPTZ,
                data JSONB NOT NULL,
                PRIMARY KEY (source, external_id)
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS inbox_items_unlearned ON inbox_items(received_at) WHERE NOT learning_processed;"#,
            r#"CREATE INDEX IF NOT EXISTS inbox_items_unprocessed ON inbox_items(source, received_at) WHERE NOT processed;"#,
            r#"
            CREATE TABLE IF NOT EXISTS outbound_posts (
                id UUID PRIMARY KEY,
                external_id TEXT UNIQUE,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                posted_at TIMESTAMPTZ,
                learning_processed BOOLEAN NOT NULL DEFAULT FALSE,
                learning_processed_at TIMESTAMPTZ,
                data JSONB NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS outbound_posts_posted_at ON outbound_posts(posted_at DESC);"#,
            r#"
            CREATE TABLE IF NOT EXISTS drafts (
                id UUID PRIMARY KEY,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS drafts_status_created ON drafts(status, created_at);"#,
            r#"
            CREATE TABLE IF NOT EXISTS draft_publish_claims (
                draft_id UUID PRIMARY KEY,
                claimed_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS threads (
                conversation_id TEXT PRIMARY KEY,
                reply_count INTEGER NOT NULL DEFAULT 0,
                stopped BOOLEAN NOT NULL DEFAULT FALSE,
                updated_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS reply_log (
                reply_to_id TEXT PRIMARY KEY,
                draft_id UUID NOT NULL,
                reply_external_id TEXT,
                claimed_at TIMESTAMPTZ NOT NULL,
                completed_at TIMESTAMPTZ
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS memories (
                id UUID PRIMARY KEY,
                kind TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS memories_kind_created ON memories(kind, created_at DESC);"#,
            r#"
            CREATE TABLE IF NOT EXISTS style_versions (
                id TEXT PRIMARY KEY,
                generated_at TIMESTAMPTZ NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT FALSE,
                activated_at TIMESTAMPTZ,
                data JSONB NOT NULL
            );
            "#,
            r#"CREATE UNIQUE INDEX IF NOT EXISTS style_versions_single_active ON style_versions(is_active) WHERE is_active;"#,
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                updated_by TEXT
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS poll_cursors (
                source TEXT PRIMARY KEY,
                cursor TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS rate_events (
                id BIGSERIAL PRIMARY KEY,
                class TEXT NOT NULL,
                at TIMESTAMPTZ NOT NULL
            );
            "#,
            r#"CREATE INDEX IF NOT EXISTS rate_events_class_at ON rate_events(class, at);"#,
            r#"
            CREATE TABLE IF NOT EXISTS leases (
                key TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                acquired_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                fencing_token BIGINT NOT NULL
            );
            "#,
        ];

        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
        }

        Ok(())
    }

    fn inbox_from_row(row: &PgRow) -> StorageResult<InboxItem> {
        let data: Value = row.try_get("data").map_err(backend)?;
        let mut item: InboxItem = from_json(data)?;
        item.processed = row.try_get("processed").map_err(backend)?;
        item.learning_processed = row.try_get("learning_processed").map_err(backend)?;
        item.learning_processed_at = row.try_get("learning_processed_at").map_err(backend)?;
        Ok(item)
    }

    fn outbound_from_row(row: &PgRow) -> StorageResult<OutboundPost> {
        let data: Value = row.try_get("data").map_err(backend)?;
        let mut post: OutboundPost = from_json(data)?;
        post.learning_processed = row.try_get("learning_processed").map_err(backend)?;
        post.learning_processed_at = row.try_get("learning_processed_at").map_err(backend)?;
        Ok(post)
    }

    fn style_from_row(row: &PgRow) -> StorageResult<StyleVersion> {
        let data: Value = row.try_get("data").map_err(backend)?;
        let mut version: StyleVersion = from_json(data)?;
        version.is_active = row.try_get("is_active").map_err(backend)?;
        version.activated_at = row.try_get("activated_at").map_err(backend)?;
        Ok(version)
    }

    fn thread_from_row(row: &PgRow) -> StorageResult<Thread> {
        let reply_count: i32 = row.try_get("reply_count").map_err(backend)?;
        Ok(Thread {
            conversation_id: row.try_get("conversation_id").map_err(backend)?,
            reply_count: u32::try_from(reply_count).unwrap_or(0),
            stopped: row.try_get("stopped").map_err(backend)?,
            updated_at: row.try_get("updated_at").map_err(backend)?,
        })
    }

    fn reply_from_row(row: &PgRow) -> StorageResult<ReplyLogEntry> {
        let reply_to_id: String = row.try_get("reply_to_id").map_err(backend)?;
        let reply_external_id: Option<String> =
            row.try_get("reply_external_id").map_err(backend)?;
        Ok(ReplyLogEntry {
            reply_to_id: ExternalId::new(reply_to_id),
            draft_id: DraftId::from_uuid(row.try_get("draft_id").map_err(backend)?),
            reply_external_id: reply_external_id.map(ExternalId::new),
            claimed_at: row.try_get("claimed_at").map_err(backend)?,
            completed_at: row.try_get("completed_at").map_err(backend)?,
        })
    }

    fn lease_from_row(row: &PgRow) -> StorageResult<LeaseRecord> {
        let holder: String = row.try_get("holder").map_err(backend)?;
        let token: i64 = row.try_get("fencing_token").map_err(backend)?;
        Ok(LeaseRecord {
            key: row.try_get("key").map_err(backend)?,
            holder: HolderId::new(holder),
            acquired_at: row.try_get("acquired_at").map_err(backend)?,
            expires_at: row.try_get("expires_at").map_err(backend)?,
            fencing_token: count(token),
        })
    }
}

#[async_trait]
impl InboxStore for PostgresStorage {
    async fn insert_inbox(&self, item: InboxItem) -> StorageResult<bool> {
        let data = to_json(&item)?;
        let result = sqlx::query(
            r#"
            INSERT INTO inbox_items
                (source, external_id, received_at, processed, learning_processed, learning_processed_at, data)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (source, external_id) DO NOTHING
            "#,
        )
        .bind(&item.source)
        .bind(item.external_id.as_str())
        .bind(item.received_at)
        .bind(item.processed)
        .bind(item.learning_processed)
        .bind(item.learning_processed_at)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }

    async fn inbox_exists(&self, source: &str, external_id: &ExternalId) -> StorageResult<bool> {
        let row = sqlx::query("SELECT 1 FROM inbox_items WHERE source = $1 AND external_id = $2")
            .bind(source)
            .bind(external_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.is_some())
    }

    async fn get_inbox(
        &self,
        source: &str,
        external_id: &ExternalId,
    ) -> StorageResult<Option<InboxItem>> {
        let row = sqlx::query("SELECT * FROM inbox_items WHERE source = $1 AND external_id = $2")
            .bind(source)
            .bind(external_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(Self::inbox_from_row).transpose()
    }

    async fn mark_inbox_processed(
        &self,
        source: &str,
        external_id: &ExternalId,
    ) -> StorageResult<()> {
        let result = sqlx::query(
            "UPDATE inbox_items SET processed = TRUE WHERE source = $1 AND external_id = $2",
        )
        .bind(source)
        .bind(external_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "inbox item {}/{}",
                source, external_id
            )));
        }
        Ok(())
    }

    async fn list_unprocessed_inbox(
        &self,
        source: &str,
        max: usize,
    ) -> StorageResult<Vec<InboxItem>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM inbox_items
            WHERE source = $1 AND NOT processed
            ORDER BY received_at ASC, external_id ASC
            LIMIT $2
            "#,
        )
        .bind(source)
        .bind(limit(max))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(Self::inbox_from_row).collect()
    }

    async fn list_unlearned_inbox(&self, max: usize) -> StorageResult<Vec<InboxItem>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM inbox_items
            WHERE NOT learning_processed
            ORDER BY received_at ASC, external_id ASC
            LIMIT $1
            "#,
        )
        .bind(limit(max))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(Self::inbox_from_row).collect()
    }

    async fn claim_inbox_learning(
        &self,
        source: &str,
        external_id: &ExternalId,
        at: DateTime<Utc>,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE inbox_items
            SET learning_processed = TRUE, learning_processed_at = $3
            WHERE source = $1 AND external_id = $2 AND NOT learning_processed
            "#,
        )
        .bind(source)
        .bind(external_id.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }

    async fn inbox_counts(&self) -> StorageResult<InboxCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE NOT processed) AS unprocessed,
                COUNT(*) FILTER (WHERE NOT learning_processed) AS unlearned
            FROM inbox_items
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        Ok(InboxCounts {
            total: count(row.try_get("total").map_err(backend)?),
            unprocessed: count(row.try_get("unprocessed").map_err(backend)?),
            unlearned: count(row.try_get("unlearned").map_err(backend)?),
        })
    }
}

#[async_trait]
impl OutboundStore for PostgresStorage {
    async fn insert_outbound(&self, post: OutboundPost) -> StorageResult<()> {
        let data = to_json(&post)?;
        let result = sqlx::query(
            r#"
            INSERT INTO outbound_posts
                (id, external_id, status, created_at, posted_at, learning_processed, learning_processed_at, data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(post.id.as_uuid())
        .bind(post.external_id.as_ref().map(ExternalId::as_str))
        .bind(post.status.as_str())
        .bind(post.created_at)
        .bind(post.posted_at)
        .bind(post.learning_processed)
        .bind(post.learning_processed_at)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict(format!(
                "outbound post {} already recorded",
                post.id
            )));
        }
        Ok(())
    }

    async fn get_outbound(&self, id: &PostId) -> StorageResult<Option<OutboundPost>> {
        let row = sqlx::query("SELECT * FROM outbound_posts WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(Self::outbound_from_row).transpose()
    }

    async fn list_recent_posted(&self, max: usize) -> StorageResult<Vec<OutboundPost>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM outbound_posts
            WHERE status = 'posted'
            ORDER BY posted_at DESC NULLS LAST, created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit(max))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(Self::outbound_from_row).collect()
    }

    async fn list_unlearned_outbound(&self, max: usize) -> StorageResult<Vec<OutboundPost>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM outbound_posts
            WHERE status = 'posted' AND NOT learning_processed
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit(max))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(Self::outbound_from_row).collect()
    }

    async fn claim_outbound_learning(&self, id: &PostId, at: DateTime<Utc>) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbound_posts
            SET learning_processed = TRUE, learning_processed_at = $2
            WHERE id = $1 AND NOT learning_processed
            "#,
        )
        .bind(id.as_uuid())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_outbound(&self) -> StorageResult<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbound_posts")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(count(total))
    }
}

#[async_trait]
impl DraftStore for PostgresStorage {
    async fn create_draft(&self, draft: Draft) -> StorageResult<()> {
        let data = to_json(&draft)?;
        let result = sqlx::query(
            r#"
            INSERT INTO drafts (id, status, created_at, updated_at, data)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(draft.id.as_uuid())
        .bind(draft.status.as_str())
        .bind(draft.created_at)
        .bind(draft.updated_at)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict(format!("draft {} already exists", draft.id)));
        }
        Ok(())
    }

    async fn get_draft(&self, id: &DraftId) -> StorageResult<Option<Draft>> {
        let row = sqlx::query("SELECT data FROM drafts WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(record) => {
                let data: Value = record.try_get("data").map_err(backend)?;
                Ok(Some(from_json(data)?))
            }
            None => Ok(None),
        }
    }

    async fn list_drafts(
        &self,
        status: Option<DraftStatus>,
        window: QueryWindow,
    ) -> StorageResult<Vec<Draft>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM drafts
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .bind(window_limit(window))
        .bind(limit(window.offset))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter()
            .map(|row| {
                let data: Value = row.try_get("data").map_err(backend)?;
                from_json(data)
            })
            .collect()
    }

    async fn list_drafts_oldest_first(
        &self,
        status: DraftStatus,
        max: usize,
    ) -> StorageResult<Vec<Draft>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM drafts d
            WHERE d.status = $1
              AND NOT EXISTS (SELECT 1 FROM draft_publish_claims c WHERE c.draft_id = d.id)
            ORDER BY d.created_at ASC, d.id ASC
            LIMIT $2
            "#,
        )
        .bind(status.as_str())
        .bind(limit(max))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter()
            .map(|row| {
                let data: Value = row.try_get("data").map_err(backend)?;
                from_json(data)
            })
            .collect()
    }

    async fn update_draft(&self, draft: Draft, expected_from: DraftStatus) -> StorageResult<()> {
        let data = to_json(&draft)?;
        let result = sqlx::query(
            r#"
            UPDATE drafts
            SET status = $2, updated_at = $3, data = $4
            WHERE id = $1 AND status = $5
            "#,
        )
        .bind(draft.id.as_uuid())
        .bind(draft.status.as_str())
        .bind(draft.updated_at)
        .bind(data)
        .bind(expected_from.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        match self.get_draft(&draft.id).await? {
            Some(current) => Err(StorageError::InvariantViolation(format!(
                "draft {} is {}, expected {}",
                draft.id, current.status, expected_from
            ))),
            None => Err(StorageError::NotFound(format!("draft {}", draft.id))),
        }
    }

    async fn draft_counts(&self) -> StorageResult<DraftCounts> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM drafts GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let mut counts = DraftCounts::empty();
        for row in rows {
            let status: String = row.try_get("status").map_err(backend)?;
            let n: i64 = row.try_get("n").map_err(backend)?;
            counts.by_status.insert(status, count(n));
        }
        Ok(counts)
    }

    async fn claim_draft_publish(&self, id: &DraftId, at: DateTime<Utc>) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO draft_publish_claims (draft_id, claimed_at)
            VALUES ($1, $2)
            ON CONFLICT (draft_id) DO NOTHING
            "#,
        )
        .bind(id.as_uuid())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_draft_publish(&self, id: &DraftId) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM draft_publish_claims WHERE draft_id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ThreadStore for PostgresStorage {
    async fn get_thread(&self, conversation_id: &str) -> StorageResult<Option<Thread>> {
        let row = sqlx::query("SELECT * FROM threads WHERE conversation_id = $1")
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(Self::thread_from_row).transpose()
    }

    async fn record_thread_reply(
        &self,
        conversation_id: &str,
        max_replies: u32,
        at: DateTime<Utc>,
    ) -> StorageResult<Thread> {
        let max = i32::try_from(max_replies).unwrap_or(i32::MAX);
        let row = sqlx::query(
            r#"
            INSERT INTO threads (conversation_id, reply_count, stopped, updated_at)
            VALUES ($1, 1, ($2 > 0 AND 1 >= $2), $3)
            ON CONFLICT (conversation_id)
            DO UPDATE SET
                reply_count = threads.reply_count + 1,
                stopped = threads.stopped OR ($2 > 0 AND threads.reply_count + 1 >= $2),
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(conversation_id)
        .bind(max)
        .bind(at)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        Self::thread_from_row(&row)
    }

    async fn stop_thread(&self, conversation_id: &str, at: DateTime<Utc>) -> StorageResult<Thread> {
        let row = sqlx::query(
            r#"
            INSERT INTO threads (conversation_id, reply_count, stopped, updated_at)
            VALUES ($1, 0, TRUE, $2)
            ON CONFLICT (conversation_id)
            DO UPDATE SET stopped = TRUE, updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(conversation_id)
        .bind(at)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        Self::thread_from_row(&row)
    }

    async fn count_stopped_threads(&self) -> StorageResult<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM threads WHERE stopped")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(count(total))
    }
}

#[async_trait]
impl ReplyLogStore for PostgresStorage {
    async fn claim_reply(&self, entry: ReplyLogEntry) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO reply_log (reply_to_id, draft_id, reply_external_id, claimed_at, completed_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (reply_to_id) DO NOTHING
            "#,
        )
        .bind(entry.reply_to_id.as_str())
        .bind(entry.draft_id.as_uuid())
        .bind(entry.reply_external_id.as_ref().map(ExternalId::as_str))
        .bind(entry.claimed_at)
        .bind(entry.completed_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete_reply(
        &self,
        reply_to_id: &ExternalId,
        draft_id: &DraftId,
        reply_external_id: &ExternalId,
        at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE reply_log
            SET reply_external_id = $3, completed_at = $4
            WHERE reply_to_id = $1 AND draft_id = $2
            "#,
        )
        .bind(reply_to_id.as_str())
        .bind(draft_id.as_uuid())
        .bind(reply_external_id.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        match self.get_reply(reply_to_id).await? {
            Some(entry) => Err(StorageError::InvariantViolation(format!(
                "reply claim for {} is owned by {}",
                reply_to_id, entry.draft_id
            ))),
            None => Err(StorageError::NotFound(format!("reply claim for {}", reply_to_id))),
        }
    }

    async fn release_reply(
        &self,
        reply_to_id: &ExternalId,
        draft_id: &DraftId,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM reply_log
            WHERE reply_to_id = $1 AND draft_id = $2 AND completed_at IS NULL
            "#,
        )
        .bind(reply_to_id.as_str())
        .bind(draft_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_reply(&self, reply_to_id: &ExternalId) -> StorageResult<Option<ReplyLogEntry>> {
        let row = sqlx::query("SELECT * FROM reply_log WHERE reply_to_id = $1")
            .bind(reply_to_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(Self::reply_from_row).transpose()
    }

    async fn count_replies(&self) -> StorageResult<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reply_log")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(count(total))
    }
}

#[async_trait]
impl MemoryStore for PostgresStorage {
    async fn insert_memory(&self, memory: Memory) -> StorageResult<()> {
        let data = to_json(&memory)?;
        sqlx::query(
            r#"
            INSERT INTO memories (id, kind, created_at, data)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(memory.id.as_uuid())
        .bind(memory.kind.as_str())
        .bind(memory.created_at)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn list_memories(
        &self,
        kind: Option<MemoryKind>,
        window: QueryWindow,
    ) -> StorageResult<Vec<Memory>> {
        let rows = sqlx::query(
            r#"
            SELECT data FROM memories
            WHERE ($1::TEXT IS NULL OR kind = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(kind.map(|k| k.as_str()))
        .bind(window_limit(window))
        .bind(limit(window.offset))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter()
            .map(|row| {
                let data: Value = row.try_get("data").map_err(backend)?;
                from_json(data)
            })
            .collect()
    }

    async fn count_memories(&self) -> StorageResult<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM memories")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(count(total))
    }
}

#[async_trait]
impl StyleStore for PostgresStorage {
    async fn insert_style_version(&self, version: StyleVersion) -> StorageResult<()> {
        if version.is_active {
            return Err(StorageError::InvalidInput(format!(
                "style version {} cannot be inserted active",
                version.id
            )));
        }

        let data = to_json(&version)?;
        let result = sqlx::query(
            r#"
            INSERT INTO style_versions (id, generated_at, is_active, activated_at, data)
            VALUES ($1, $2, FALSE, NULL, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(version.id.as_str())
        .bind(version.generated_at)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict(format!(
                "style version {} already exists",
                version.id
            )));
        }
        Ok(())
    }

    async fn list_style_versions(&self, window: QueryWindow) -> StorageResult<Vec<StyleVersion>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM style_versions
            ORDER BY generated_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(window_limit(window))
        .bind(limit(window.offset))
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(Self::style_from_row).collect()
    }

    async fn get_style_version(&self, id: &StyleVersionId) -> StorageResult<Option<StyleVersion>> {
        let row = sqlx::query("SELECT * FROM style_versions WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(Self::style_from_row).transpose()
    }

    async fn active_style_version(&self) -> StorageResult<Option<StyleVersion>> {
        let row = sqlx::query("SELECT * FROM style_versions WHERE is_active")
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(Self::style_from_row).transpose()
    }

    async fn set_active_style(
        &self,
        id: &StyleVersionId,
        at: DateTime<Utc>,
    ) -> StorageResult<StyleVersion> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query("UPDATE style_versions SET is_active = FALSE WHERE is_active AND id <> $1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        let row = sqlx::query(
            r#"
            UPDATE style_versions
            SET is_active = TRUE, activated_at = $2
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.as_str())
        .bind(at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;

        let Some(row) = row else {
            tx.rollback().await.map_err(backend)?;
            return Err(StorageError::NotFound(format!("style version {}", id)));
        };

        let version = Self::style_from_row(&row)?;
        tx.commit().await.map_err(backend)?;
        Ok(version)
    }
}

#[async_trait]
impl SettingsStorage for PostgresStorage {
    async fn list_settings(&self) -> StorageResult<Vec<SettingRecord>> {
        let rows = sqlx::query("SELECT * FROM settings ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        rows.into_iter()
            .map(|row| {
                Ok(SettingRecord {
                    key: row.try_get("key").map_err(backend)?,
                    value: row.try_get("value").map_err(backend)?,
                    updated_at: row.try_get("updated_at").map_err(backend)?,
                    updated_by: row.try_get("updated_by").map_err(backend)?,
                })
            })
            .collect()
    }

    async fn get_setting(&self, key: &str) -> StorageResult<Option<SettingRecord>> {
        let row = sqlx::query("SELECT * FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => Ok(Some(SettingRecord {
                key: row.try_get("key").map_err(backend)?,
                value: row.try_get("value").map_err(backend)?,
                updated_at: row.try_get("updated_at").map_err(backend)?,
                updated_by: row.try_get("updated_by").map_err(backend)?,
            })),
            None => Ok(None),
        }
    }

    async fn upsert_setting(&self, record: SettingRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at, updated_by)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (key)
            DO UPDATE SET
                value = EXCLUDED.value,
                updated_at = EXCLUDED.updated_at,
                updated_by = EXCLUDED.updated_by
            "#,
        )
        .bind(&record.key)
        .bind(&record.value)
        .bind(record.updated_at)
        .bind(&record.updated_by)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }
}

#[async_trait]
impl CursorStore for PostgresStorage {
    async fn get_cursor(&self, source: &str) -> StorageResult<Option<String>> {
        sqlx::query_scalar("SELECT cursor FROM poll_cursors WHERE source = $1")
            .bind(source)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)
    }

    async fn set_cursor(&self, source: &str, cursor: &str, at: DateTime<Utc>) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO poll_cursors (source, cursor, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (source)
            DO UPDATE SET cursor = EXCLUDED.cursor, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(source)
        .bind(cursor)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }
}

#[async_trait]
impl CounterStore for PostgresStorage {
    async fn record_event(&self, class: &str, at: DateTime<Utc>) -> StorageResult<()> {
        sqlx::query("INSERT INTO rate_events (class, at) VALUES ($1, $2)")
            .bind(class)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn reserve_event(
        &self,
        class: &str,
        at: DateTime<Utc>,
        caps: &[RateCap],
    ) -> StorageResult<Option<u64>> {
        let since: Vec<DateTime<Utc>> = caps.iter().map(|cap| cap.since).collect();
        let max: Vec<i64> = caps.iter().map(|cap| i64::try_from(cap.max).unwrap_or(i64::MAX)).collect();

        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(class)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO rate_events (class, at)
            SELECT $1, $2
            WHERE NOT EXISTS (
                SELECT 1 FROM unnest($3::TIMESTAMPTZ[], $4::BIGINT[]) AS cap(since, ceiling)
                WHERE (SELECT COUNT(*) FROM rate_events e WHERE e.class = $1 AND e.at > cap.since)
                    >= cap.ceiling
            )
            RETURNING id
            "#,
        )
        .bind(class)
        .bind(at)
        .bind(since)
        .bind(max)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(id.map(count))
    }

    async fn cancel_event(&self, id: u64) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM rate_events WHERE id = $1")
            .bind(i64::try_from(id).unwrap_or(i64::MAX))
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_events_since(&self, class: &str, since: DateTime<Utc>) -> StorageResult<u64> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM rate_events WHERE class = $1 AND at > $2")
                .bind(class)
                .bind(since)
                .fetch_one(&self.pool)
                .await
                .map_err(backend)?;
        Ok(count(total))
    }

    async fn prune_events_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM rate_events WHERE at <= $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LeaseStore for PostgresStorage {
    async fn try_acquire_lease(
        &self,
        key: &str,
        holder: &HolderId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<LeaseRecord>> {
        let expires_at = now + ttl_to_chrono(ttl)?;
        let row = sqlx::query(
            r#"
            INSERT INTO leases (key, holder, acquired_at, expires_at, fencing_token)
            VALUES ($1, $2, $3, $4, 1)
            ON CONFLICT (key)
            DO UPDATE SET
                holder = EXCLUDED.holder,
                acquired_at = EXCLUDED.acquired_at,
                expires_at = EXCLUDED.expires_at,
                fencing_token = leases.fencing_token + 1
            WHERE leases.expires_at <= EXCLUDED.acquired_at
            RETURNING *
            "#,
        )
        .bind(key)
        .bind(holder.as_str())
        .bind(now)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(Self::lease_from_row).transpose()
    }

    async fn renew_lease(
        &self,
        key: &str,
        holder: &HolderId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<LeaseRecord>> {
        let expires_at = now + ttl_to_chrono(ttl)?;
        let row = sqlx::query(
            r#"
            UPDATE leases
            SET expires_at = $4
            WHERE key = $1 AND holder = $2 AND expires_at > $3
            RETURNING *
            "#,
        )
        .bind(key)
        .bind(holder.as_str())
        .bind(now)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(Self::lease_from_row).transpose()
    }

    async fn release_lease(&self, key: &str, holder: &HolderId) -> StorageResult<bool> {
        // Expire in place so the fencing token keeps increasing across owners.
        let result = sqlx::query(
            r#"
            UPDATE leases
            SET expires_at = acquired_at
            WHERE key = $1 AND holder = $2 AND expires_at > acquired_at
            "#,
        )
        .bind(key)
        .bind(holder.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_lease(&self, key: &str) -> StorageResult<Option<LeaseRecord>> {
        let row = sqlx::query("SELECT * FROM leases WHERE key = $1 AND expires_at > acquired_at")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(Self::lease_from_row).transpose()
    }
}
