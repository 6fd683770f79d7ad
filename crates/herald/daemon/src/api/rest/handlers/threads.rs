use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    Json,
};
use herald_types::Thread;

/// Stop replying in a conversation
pub async fn stop_thread(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<Thread>> {
    if conversation_id.trim().is_empty() {
        return Err(ApiError::BadRequest("conversation id is empty".to_string()));
    }
    Ok(Json(state.orchestrator.stop_thread(&conversation_id).await?))
}
