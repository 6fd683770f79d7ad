use super::window;
use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Query, State},
    Json,
};
use herald_types::{Memory, MemoryKind};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ListMemoriesQuery {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// Extracted memories, newest first
pub async fn list_memories(
    State(state): State<AppState>,
    Query(query): Query<ListMemoriesQuery>,
) -> ApiResult<Json<Vec<Memory>>> {
    let kind = match query.kind.as_deref() {
        Some(raw) => Some(
            MemoryKind::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown memory kind: {}", raw)))?,
        ),
        None => None,
    };

    let memories = state
        .orchestrator
        .memories(kind, window(query.limit, query.offset))
        .await?;
    Ok(Json(memories))
}
