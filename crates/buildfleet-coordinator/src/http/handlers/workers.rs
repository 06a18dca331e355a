//! Worker handlers.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use buildfleet_core::{ResourceUsage, WorkerInfo};

use crate::http::error::ApiError;
use crate::http::responses::{
    HeartbeatRequest, RegisterWorkerResponse, SuccessResponse, WorkerListResponse, WorkerResponse,
};
use crate::service::WorkerService;
use crate::state::AppState;

/// Register a worker.
pub async fn register_worker(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<WorkerInfo>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterWorkerResponse>), ApiError> {
    let Json(info) = payload?;
    let record = WorkerService::new(state).register(info).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterWorkerResponse {
            worker_id: record.info.worker_id,
            success: true,
        }),
    ))
}

/// Record a heartbeat.
pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let Json(request) = payload?;
    let resources = ResourceUsage {
        cpu_usage: request.cpu_usage,
        memory_usage: request.memory_usage,
    };
    WorkerService::new(state)
        .heartbeat(&request.worker_id, resources)
        .await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// List workers with their load.
pub async fn list_workers(State(state): State<Arc<AppState>>) -> Json<WorkerListResponse> {
    let workers = WorkerService::new(state)
        .list()
        .await
        .into_iter()
        .map(WorkerResponse::from)
        .collect();
    Json(WorkerListResponse { workers })
}
