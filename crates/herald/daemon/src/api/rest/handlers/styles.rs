//! Style version handlers

use super::{window, Page};
use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use herald_types::{StyleVersion, StyleVersionId};

pub async fn list_styles(
    State(state): State<AppState>,
    Query(page): Query<Page>,
) -> ApiResult<Json<Vec<StyleVersion>>> {
    Ok(Json(state.orchestrator.styles().list(window(page.limit, page.offset)).await?))
}

pub async fn activate_style(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StyleVersion>> {
    let id = StyleVersionId::new(id);
    Ok(Json(state.orchestrator.styles().activate(&id).await?))
}

pub async fn rollback_style(State(state): State<AppState>) -> ApiResult<Json<StyleVersion>> {
    Ok(Json(state.orchestrator.styles().rollback().await?))
}
