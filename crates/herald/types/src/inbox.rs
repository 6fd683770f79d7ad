//! Inbound mentions pulled from the external platform

use crate::ids::ExternalId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One item as returned by a platform poll, before deduplication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    /// Platform message id, when the platform supplies one
    #[serde(default)]
    pub external_id: Option<String>,

    pub author_id: String,

    /// Conversation the item belongs to, used to bound engagement
    #[serde(default)]
    pub conversation_id: Option<String>,

    pub text: String,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    /// Untouched platform payload
    #[serde(default)]
    pub payload: Value,
}

impl RawItem {
    pub fn new(external_id: Option<&str>, author_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            external_id: external_id.map(str::to_string),
            author_id: author_id.into(),
            conversation_id: None,
            text: text.into(),
            created_at: None,
            payload: Value::Null,
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Stable deduplication key: the platform id when present and non-empty,
    /// otherwise a content hash over author and text.
    pub fn dedup_key(&self) -> ExternalId {
        match self.external_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => ExternalId::new(id),
            _ => {
                let mut hasher = blake3::Hasher::new();
                hasher.update(self.author_id.as_bytes());
                hasher.update(&[0u8]);
                hasher.update(self.text.as_bytes());
                ExternalId::new(format!("hash:{}", hasher.finalize().to_hex()))
            }
        }
    }
}

/// A stored inbound item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxItem {
    /// Platform the item came from; `(source, external_id)` is unique
    pub source: String,
    pub external_id: ExternalId,
    pub author_id: String,
    pub conversation_id: Option<String>,
    pub text: String,
    pub payload: Value,
    pub score: f64,
    pub received_at: DateTime<Utc>,
    pub processed: bool,
    pub learning_processed: bool,
    pub learning_processed_at: Option<DateTime<Utc>>,
}

impl InboxItem {
    pub fn from_raw(source: impl Into<String>, raw: &RawItem, score: f64, received_at: DateTime<Utc>) -> Self {
        Self {
            source: source.into(),
            external_id: raw.dedup_key(),
            author_id: raw.author_id.clone(),
            conversation_id: raw.conversation_id.clone(),
            text: raw.text.clone(),
            payload: raw.payload.clone(),
            score,
            received_at,
            processed: false,
            learning_processed: false,
            learning_processed_at: None,
        }
    }
}
