//! Runtime settings handlers

use super::actor;
use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{extract::State, http::HeaderMap, Json};
use herald_types::{RuntimeSettings, SettingsPatch};

pub async fn get_settings(State(state): State<AppState>) -> ApiResult<Json<RuntimeSettings>> {
    Ok(Json(state.orchestrator.settings().current().await?))
}

/// Persist a partial update; it applies from the next gate check on every
/// instance.
pub async fn patch_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(patch): Json<SettingsPatch>,
) -> ApiResult<Json<RuntimeSettings>> {
    if patch.is_empty() {
        return Err(ApiError::Validation("settings patch is empty".to_string()));
    }

    let actor = actor(&headers);
    let settings = state
        .orchestrator
        .apply_settings(patch, actor.as_deref())
        .await?;
    Ok(Json(settings))
}
