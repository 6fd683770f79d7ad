//! Error types for the orchestration runtime.

use herald_storage::StorageError;
use herald_types::{DraftId, DraftStatus, StyleVersionId, TransitionError, WorkerKind};
use std::time::Duration;
use thiserror::Error;

/// Failure reported by an external collaborator (platform, generator, ...).
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    /// Network failure, 429 or 5xx. Retry later.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// 401/403. Retrying will not help until credentials change.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The collaborator refused this particular request.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl CollaboratorError {
    /// Errors that require operator intervention.
    pub fn is_permanent(&self) -> bool {
        matches!(self, CollaboratorError::Unauthorized(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CollaboratorError::Transient(_) | CollaboratorError::Timeout(_)
        )
    }
}

/// Errors from the draft approval queue.
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("draft not found: {0}")]
    NotFound(DraftId),

    #[error("draft {id} is already finalized ({status})")]
    AlreadyFinalized { id: DraftId, status: DraftStatus },

    /// Another attempt holds the publish claim for this draft.
    #[error("draft {0} is already being published")]
    PublishInProgress(DraftId),

    #[error("draft {0} must be approved before publishing")]
    ApprovalRequired(DraftId),

    #[error("no platform configured for publishing")]
    PublisherUnavailable,

    #[error("publish failed: {0}")]
    Publish(#[from] CollaboratorError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ApprovalError {
    pub(crate) fn from_transition(id: DraftId, err: TransitionError) -> Self {
        match err {
            TransitionError::AlreadyFinalized(status) => {
                ApprovalError::AlreadyFinalized { id, status }
            }
            TransitionError::ApprovalRequired => ApprovalError::ApprovalRequired(id),
        }
    }
}

/// Errors from style activation and rollback.
#[derive(Debug, Error)]
pub enum StyleError {
    #[error("style version not found: {0}")]
    NotFound(StyleVersionId),

    #[error("style version {id} violates output policy: {}", reasons.join("; "))]
    PolicyViolation {
        id: StyleVersionId,
        reasons: Vec<String>,
    },

    #[error("no previously active style version to roll back to")]
    NoPreviousVersion,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors raised inside worker iterations and by worker administration.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("unknown worker: {0}")]
    UnknownWorker(String),

    #[error("worker {kind} is not configured: {reason}")]
    NotConfigured { kind: WorkerKind, reason: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    Approval(#[from] ApprovalError),
}

impl WorkerError {
    /// Permanent collaborator failures, possibly wrapped by the approval queue.
    pub fn is_permanent(&self) -> bool {
        match self {
            WorkerError::Collaborator(e) => e.is_permanent(),
            WorkerError::Approval(ApprovalError::Publish(e)) => e.is_permanent(),
            _ => false,
        }
    }
}
