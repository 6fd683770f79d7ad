//! Narrow interfaces to everything outside the orchestration core.
//!
//! Each collaborator is injected at construction, so real HTTP adapters and
//! scripted test doubles are interchangeable.

use crate::error::CollaboratorError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_types::{
    ExternalId, InboxItem, MemoryCandidate, OutboundPost, RawItem, StyleVersionPayload,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// One page of new platform items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollBatch {
    pub items: Vec<RawItem>,
    /// Cursor to resume from after this batch; `None` keeps the old one.
    pub next_cursor: Option<String>,
}

/// The social platform boundary.
#[async_trait]
pub trait Platform: Send + Sync {
    async fn poll(&self, cursor: Option<&str>) -> CollaboratorResult<PollBatch>;

    /// Publish one post, optionally as a reply. Returns the platform's id.
    async fn publish(&self, text: &str, reply_to: Option<&ExternalId>)
        -> CollaboratorResult<ExternalId>;
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate_reply(&self, item: &InboxItem) -> CollaboratorResult<String>;

    async fn generate_timeline_post(&self) -> CollaboratorResult<String>;
}

#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, item: &RawItem) -> CollaboratorResult<f64>;
}

/// A row the learning worker extracts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "row", rename_all = "snake_case")]
pub enum LearningRow {
    Inbox(InboxItem),
    Outbound(OutboundPost),
}

impl LearningRow {
    /// Identifier recorded in each memory's source ids.
    pub fn source_id(&self) -> String {
        match self {
            LearningRow::Inbox(item) => item.external_id.as_str().to_string(),
            LearningRow::Outbound(post) => match &post.external_id {
                Some(id) => id.as_str().to_string(),
                None => post.id.to_string(),
            },
        }
    }

    pub fn text(&self) -> &str {
        match self {
            LearningRow::Inbox(item) => &item.text,
            LearningRow::Outbound(post) => &post.text,
        }
    }

    /// Ordering key: oldest rows are learned first.
    pub fn seen_at(&self) -> DateTime<Utc> {
        match self {
            LearningRow::Inbox(item) => item.received_at,
            LearningRow::Outbound(post) => post.posted_at.unwrap_or(post.created_at),
        }
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, row: &LearningRow) -> CollaboratorResult<Vec<MemoryCandidate>>;
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn build_style_version(
        &self,
        posts: &[OutboundPost],
    ) -> CollaboratorResult<StyleVersionPayload>;
}

/// Bound a collaborator call so a stuck endpoint cannot wedge a worker.
pub async fn call_with_timeout<T, F>(timeout: Duration, call: F) -> CollaboratorResult<T>
where
    F: Future<Output = CollaboratorResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout(timeout)),
    }
}
