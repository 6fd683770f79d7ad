//! System lifecycle handlers.

use crate::api::rest::state::AppState;
use axum::{extract::State, Json};
use serde::Serialize;

/// Response body for system shutdown requests.
#[derive(Debug, Serialize)]
pub struct ShutdownResponse {
    pub status: String,
    pub message: String,
}

/// Request a graceful daemon shutdown.
pub async fn shutdown_daemon(State(state): State<AppState>) -> Json<ShutdownResponse> {
    state.orchestrator.shutdown();

    Json(ShutdownResponse {
        status: "accepted".to_string(),
        message: "Shutdown signal sent".to_string(),
    })
}
