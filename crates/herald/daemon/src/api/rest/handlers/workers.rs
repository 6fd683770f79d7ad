//! Worker administration handlers

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    Json,
};
use herald_runtime::TickReport;
use herald_types::{RunOutcome, WorkerKind, WorkerStatus};
use serde::Serialize;
use std::collections::BTreeMap;

fn parse_kind(raw: &str) -> ApiResult<WorkerKind> {
    WorkerKind::parse(raw).ok_or_else(|| ApiError::NotFound(format!("unknown worker: {}", raw)))
}

pub async fn list_workers(State(state): State<AppState>) -> Json<Vec<WorkerStatus>> {
    Json(state.orchestrator.registry().snapshot())
}

/// Clear a suspension or disabled reason and wake the worker
pub async fn enable_worker(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> ApiResult<Json<WorkerStatus>> {
    let kind = parse_kind(&kind)?;
    let status = state.orchestrator.enable_worker(kind)?;
    tracing::info!(worker = %kind, "Worker enabled by operator");
    Ok(Json(status))
}

/// Result of an out-of-schedule iteration
#[derive(Debug, Serialize)]
pub struct RunWorkerResponse {
    pub worker: WorkerKind,
    pub outcome: RunOutcome,
    pub counters: BTreeMap<String, u64>,
}

impl RunWorkerResponse {
    fn new(worker: WorkerKind, report: TickReport) -> Self {
        Self {
            worker,
            outcome: report.outcome,
            counters: report.counters,
        }
    }
}

/// Run one iteration now
pub async fn run_worker(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> ApiResult<Json<RunWorkerResponse>> {
    let kind = parse_kind(&kind)?;
    let report = state.orchestrator.run_worker_once(kind).await?;
    Ok(Json(RunWorkerResponse::new(kind, report)))
}
