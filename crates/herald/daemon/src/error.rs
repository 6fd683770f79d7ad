//! Error types for heraldd

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use herald_runtime::{ApprovalError, StyleError, WorkerError};
use herald_storage::StorageError;
use serde::Serialize;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for DaemonError {
    fn from(err: config::ConfigError) -> Self {
        DaemonError::Config(err.to_string())
    }
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Operation conflicts with the current state of a resource
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Style output policy refused an activation
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// Draft must be approved first
    #[error("Approval required: {0}")]
    ApprovalRequired(String),

    /// Collaborator or worker is not available on this instance
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<ApprovalError> for ApiError {
    fn from(err: ApprovalError) -> Self {
        match err {
            ApprovalError::NotFound(_) => ApiError::NotFound(err.to_string()),
            ApprovalError::AlreadyFinalized { .. } | ApprovalError::PublishInProgress(_) => {
                ApiError::Conflict(err.to_string())
            }
            ApprovalError::ApprovalRequired(_) => ApiError::ApprovalRequired(err.to_string()),
            ApprovalError::PublisherUnavailable => ApiError::Unavailable(err.to_string()),
            ApprovalError::Publish(_) => ApiError::Internal(err.to_string()),
            ApprovalError::Storage(e) => ApiError::Storage(e),
        }
    }
}

impl From<StyleError> for ApiError {
    fn from(err: StyleError) -> Self {
        match err {
            StyleError::NotFound(_) => ApiError::NotFound(err.to_string()),
            StyleError::PolicyViolation { .. } => ApiError::PolicyViolation(err.to_string()),
            StyleError::NoPreviousVersion => ApiError::Conflict(err.to_string()),
            StyleError::Storage(e) => ApiError::Storage(e),
        }
    }
}

impl From<WorkerError> for ApiError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::UnknownWorker(_) => ApiError::NotFound(err.to_string()),
            WorkerError::NotConfigured { .. } => ApiError::Unavailable(err.to_string()),
            WorkerError::Storage(e) => ApiError::Storage(e),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            ApiError::PolicyViolation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "POLICY_VIOLATION"),
            ApiError::ApprovalRequired(_) => (StatusCode::FORBIDDEN, "APPROVAL_REQUIRED"),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Storage(StorageError::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Storage(StorageError::Conflict(_)) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Storage(StorageError::InvalidInput(_)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST")
            }
            ApiError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            details: None,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;
    use herald_types::{DraftId, DraftStatus, StyleVersionId, WorkerKind};

    #[test]
    fn test_api_error_status_codes() {
        assert_eq!(
            ApiError::NotFound("test".to_string()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::BadRequest("test".to_string()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Storage(StorageError::Backend("down".to_string()))
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_finalized_draft_is_a_conflict() {
        let err: ApiError = ApprovalError::AlreadyFinalized {
            id: DraftId::generate(),
            status: DraftStatus::Rejected,
        }
        .into();
        assert!(matches!(err, ApiError::Conflict(_)));
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_unapproved_publish_is_forbidden() {
        let err: ApiError = ApprovalError::ApprovalRequired(DraftId::generate()).into();
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_style_errors_map_to_client_errors() {
        let violation: ApiError = StyleError::PolicyViolation {
            id: StyleVersionId::new("style-1"),
            reasons: vec!["too long".into()],
        }
        .into();
        assert_eq!(
            violation.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );

        let missing: ApiError = StyleError::NotFound(StyleVersionId::new("nope")).into();
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_unconfigured_worker_is_unavailable() {
        let err: ApiError = WorkerError::NotConfigured {
            kind: WorkerKind::SelfStyle,
            reason: "missing collaborator: analyzer".into(),
        }
        .into();
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
