//! Runtime-mutable settings
//!
//! Settings are key/value rows layered over process defaults. A stored row
//! always wins; a missing row falls back to the default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const SAFE_MODE: &str = "safe_mode";
pub const APPROVAL_REQUIRED: &str = "approval_required";

/// Feature flag names understood by the workers
pub mod flags {
    pub const INGESTION: &str = "ingestion_enabled";
    pub const TIMELINE: &str = "timeline_enabled";
    pub const LEARNING: &str = "learning_enabled";
    pub const SELF_STYLE: &str = "self_style_enabled";
    pub const STYLE_BLEND: &str = "style_blend_enabled";
}

/// One persisted settings row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingRecord {
    pub key: String,
    pub value: Value,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<String>,
}

/// Effective settings after layering stored rows over defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub safe_mode: bool,
    pub approval_required: bool,
    pub flags: BTreeMap<String, bool>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        let mut flags = BTreeMap::new();
        flags.insert(flags::INGESTION.to_string(), true);
        flags.insert(flags::TIMELINE.to_string(), true);
        flags.insert(flags::LEARNING.to_string(), true);
        flags.insert(flags::SELF_STYLE.to_string(), false);
        flags.insert(flags::STYLE_BLEND.to_string(), false);

        Self {
            safe_mode: false,
            approval_required: true,
            flags,
        }
    }
}

impl RuntimeSettings {
    /// Unknown flags read as off.
    pub fn flag(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }

    /// Layer stored rows over `defaults`. Rows whose value is not a boolean
    /// are ignored and reported back by key.
    pub fn overlay(defaults: &RuntimeSettings, rows: &[SettingRecord]) -> (RuntimeSettings, Vec<String>) {
        let mut effective = defaults.clone();
        let mut ignored = Vec::new();

        for row in rows {
            let Some(value) = row.value.as_bool() else {
                ignored.push(row.key.clone());
                continue;
            };

            match row.key.as_str() {
                SAFE_MODE => effective.safe_mode = value,
                APPROVAL_REQUIRED => effective.approval_required = value,
                other => {
                    effective.flags.insert(other.to_string(), value);
                }
            }
        }

        (effective, ignored)
    }
}

/// Partial update submitted by an operator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsPatch {
    #[serde(default)]
    pub safe_mode: Option<bool>,
    #[serde(default)]
    pub approval_required: Option<bool>,
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self.safe_mode.is_none() && self.approval_required.is_none() && self.flags.is_empty()
    }

    /// Rows to persist for this patch.
    pub fn into_records(self, now: DateTime<Utc>, actor: Option<&str>) -> Vec<SettingRecord> {
        let record = |key: &str, value: bool| SettingRecord {
            key: key.to_string(),
            value: Value::Bool(value),
            updated_at: now,
            updated_by: actor.map(str::to_string),
        };

        let mut records = Vec::new();
        if let Some(value) = self.safe_mode {
            records.push(record(SAFE_MODE, value));
        }
        if let Some(value) = self.approval_required {
            records.push(record(APPROVAL_REQUIRED, value));
        }
        for (key, value) in &self.flags {
            records.push(record(key, *value));
        }
        records
    }
}
