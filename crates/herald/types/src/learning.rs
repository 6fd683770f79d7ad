//! Learning records: extracted memories and generated style versions

use crate::ids::{MemoryId, StyleVersionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Category of an extracted memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Slang,
    Narrative,
    Risk,
    Engagement,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Slang => "slang",
            MemoryKind::Narrative => "narrative",
            MemoryKind::Risk => "risk",
            MemoryKind::Engagement => "engagement",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "slang" => Some(MemoryKind::Slang),
            "narrative" => Some(MemoryKind::Narrative),
            "risk" => Some(MemoryKind::Risk),
            "engagement" => Some(MemoryKind::Engagement),
            _ => None,
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extractor output, not yet persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryCandidate {
    pub kind: MemoryKind,
    pub content: String,
    pub confidence: f64,
    #[serde(default)]
    pub source_ids: Vec<String>,
    #[serde(default)]
    pub metadata: Value,
}

/// Append-only learning record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: MemoryId,
    pub kind: MemoryKind,
    pub content: String,
    pub confidence: f64,
    pub source_ids: Vec<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl Memory {
    /// Persistable memory from a candidate. Confidence is clamped to `[0, 1]`
    /// and the originating row id is always part of `source_ids`.
    pub fn from_candidate(candidate: MemoryCandidate, source_id: &str, now: DateTime<Utc>) -> Self {
        let mut source_ids = candidate.source_ids;
        if !source_ids.iter().any(|id| id == source_id) {
            source_ids.push(source_id.to_string());
        }

        let confidence = if candidate.confidence.is_finite() {
            candidate.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        Self {
            id: MemoryId::generate(),
            kind: candidate.kind,
            content: candidate.content,
            confidence,
            source_ids,
            metadata: candidate.metadata,
            created_at: now,
        }
    }
}

/// Analyzer output describing a proposed voice
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StyleVersionPayload {
    /// Style rules in the order they should be applied
    #[serde(default)]
    pub rules: Vec<String>,

    /// Phrases the persona has picked up
    #[serde(default)]
    pub vocabulary: Vec<String>,

    /// Longest post the style allows, if it constrains length at all
    #[serde(default)]
    pub max_post_chars: Option<u32>,

    #[serde(default)]
    pub summary: Option<String>,

    #[serde(default)]
    pub metadata: Value,
}

/// Generated style proposal. Created inactive; only an explicit activation
/// flips `is_active`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleVersion {
    pub id: StyleVersionId,
    pub generated_at: DateTime<Utc>,
    pub source_count: u32,
    pub is_active: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub payload: StyleVersionPayload,
}

impl StyleVersion {
    pub fn proposal(payload: StyleVersionPayload, source_count: u32, generated_at: DateTime<Utc>) -> Self {
        Self {
            id: StyleVersionId::from_timestamp(generated_at),
            generated_at,
            source_count,
            is_active: false,
            activated_at: None,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_from_candidate_tracks_source() {
        let candidate = MemoryCandidate {
            kind: MemoryKind::Slang,
            content: "ser".to_string(),
            confidence: 1.7,
            source_ids: vec!["other".to_string()],
            metadata: Value::Null,
        };

        let memory = Memory::from_candidate(candidate, "inbox:x:42", Utc::now());
        assert_eq!(memory.confidence, 1.0);
        assert_eq!(memory.source_ids, vec!["other".to_string(), "inbox:x:42".to_string()]);
    }

    #[test]
    fn test_proposal_is_never_active() {
        let version = StyleVersion::proposal(StyleVersionPayload::default(), 25, Utc::now());
        assert!(!version.is_active);
        assert!(version.activated_at.is_none());
        assert!(version.id.as_str().starts_with("style-"));
    }
}
