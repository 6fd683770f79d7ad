//! Worker status model surfaced to operators

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The recurring workers of the orchestration layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    Ingestion,
    Timeline,
    Learning,
    SelfStyle,
    Publisher,
}

impl WorkerKind {
    pub const ALL: [WorkerKind; 5] = [
        WorkerKind::Ingestion,
        WorkerKind::Timeline,
        WorkerKind::Learning,
        WorkerKind::SelfStyle,
        WorkerKind::Publisher,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::Ingestion => "ingestion",
            WorkerKind::Timeline => "timeline",
            WorkerKind::Learning => "learning",
            WorkerKind::SelfStyle => "self_style",
            WorkerKind::Publisher => "publisher",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an iteration did no work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    SafeMode,
    RateLimited,
    LockContention,
    InsufficientData,
    FeatureDisabled,
    NothingToDo,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::SafeMode => "safe mode",
            SkipReason::RateLimited => "rate limited",
            SkipReason::LockContention => "lock contention",
            SkipReason::InsufficientData => "insufficient data",
            SkipReason::FeatureDisabled => "feature disabled",
            SkipReason::NothingToDo => "nothing to do",
        };
        f.write_str(text)
    }
}

/// Result of one worker iteration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Skipped { reason: SkipReason },
    /// The worker refuses to run. `requires_operator` outcomes stay in place
    /// until an operator re-enables the worker.
    Disabled { reason: String, requires_operator: bool },
    Failed { error: String },
}

impl RunOutcome {
    pub fn skipped(reason: SkipReason) -> Self {
        RunOutcome::Skipped { reason }
    }

    pub fn failed(error: impl fmt::Display) -> Self {
        RunOutcome::Failed {
            error: error.to_string(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, RunOutcome::Failed { .. })
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => f.write_str("completed"),
            RunOutcome::Skipped { reason } => write!(f, "skipped: {}", reason),
            RunOutcome::Disabled { reason, .. } => write!(f, "disabled: {}", reason),
            RunOutcome::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

/// Operator-facing state of one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub kind: WorkerKind,
    pub enabled: bool,
    pub disabled_reason: Option<String>,

    /// Set after a permanent failure; cleared only by an operator
    pub suspended: bool,

    pub last_run_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<RunOutcome>,
    pub last_error: Option<String>,
    pub error_count: u64,
    pub run_count: u64,

    /// Cumulative counters reported by the worker (fetched, stored, ...)
    pub counters: BTreeMap<String, u64>,
}

impl WorkerStatus {
    pub fn new(kind: WorkerKind) -> Self {
        Self {
            kind,
            enabled: true,
            disabled_reason: None,
            suspended: false,
            last_run_at: None,
            last_success_at: None,
            last_outcome: None,
            last_error: None,
            error_count: 0,
            run_count: 0,
            counters: BTreeMap::new(),
        }
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}
