//! Draft review handlers

use super::{actor, window};
use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use herald_runtime::ApprovalReceipt;
use herald_types::{Draft, DraftId, DraftStatus};
use serde::Deserialize;

fn parse_draft_id(raw: &str) -> ApiResult<DraftId> {
    DraftId::parse(raw).ok_or_else(|| ApiError::BadRequest(format!("invalid draft id: {}", raw)))
}

/// Draft listing filters
#[derive(Debug, Deserialize)]
pub struct ListDraftsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// List drafts, newest first, optionally filtered by status
pub async fn list_drafts(
    State(state): State<AppState>,
    Query(query): Query<ListDraftsQuery>,
) -> ApiResult<Json<Vec<Draft>>> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            DraftStatus::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown draft status: {}", raw)))?,
        ),
        None => None,
    };

    let drafts = state
        .orchestrator
        .queue()
        .list(status, window(query.limit, query.offset))
        .await?;
    Ok(Json(drafts))
}

pub async fn get_draft(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Draft>> {
    let id = parse_draft_id(&id)?;
    Ok(Json(state.orchestrator.queue().get(&id).await?))
}

/// Approve a draft, then attempt to publish it
pub async fn approve_draft(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<ApprovalReceipt>> {
    let id = parse_draft_id(&id)?;
    let actor = actor(&headers);
    let receipt = state
        .orchestrator
        .approve_and_publish(&id, actor.as_deref())
        .await?;
    Ok(Json(receipt))
}

/// Reject request body
#[derive(Debug, Default, Deserialize)]
pub struct RejectDraftRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn reject_draft(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<RejectDraftRequest>>,
) -> ApiResult<Json<Draft>> {
    let id = parse_draft_id(&id)?;
    let actor = actor(&headers);
    let reason = body.and_then(|Json(request)| request.reason);
    let draft = state
        .orchestrator
        .reject(&id, actor.as_deref(), reason)
        .await?;
    Ok(Json(draft))
}
