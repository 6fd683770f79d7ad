use chrono::{DateTime, Utc};
use herald_types::{DraftStatus, HolderId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A held lease on a named lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub key: String,
    pub holder: HolderId,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Incremented on every change of ownership.
    pub fencing_token: u64,
}

impl LeaseRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_held_by(&self, holder: &HolderId, now: DateTime<Utc>) -> bool {
        &self.holder == holder && !self.is_expired(now)
    }
}

/// A rolling-window ceiling checked by [`CounterStore::reserve_event`].
///
/// [`CounterStore::reserve_event`]: crate::CounterStore::reserve_event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateCap {
    /// Events strictly after this instant count against the cap.
    pub since: DateTime<Utc>,
    pub max: u64,
}

/// Aggregate inbox counts for the status surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxCounts {
    pub total: u64,
    pub unprocessed: u64,
    pub unlearned: u64,
}

/// Draft counts keyed by status name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftCounts {
    pub by_status: BTreeMap<String, u64>,
}

impl DraftCounts {
    /// Every status present with a zero count.
    pub fn empty() -> Self {
        let by_status = DraftStatus::ALL
            .iter()
            .map(|status| (status.as_str().to_string(), 0))
            .collect();
        Self { by_status }
    }

    pub fn get(&self, status: DraftStatus) -> u64 {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }

    pub(crate) fn bump(&mut self, status: DraftStatus) {
        *self.by_status.entry(status.as_str().to_string()).or_insert(0) += 1;
    }
}
