//! Build handlers.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use buildfleet_core::{Build, BuildId, BuildReport, BuildRequest, BuildStatus};

use crate::http::error::ApiError;
use crate::http::responses::{
    AcceptedResponse, BuildListResponse, BuildStatusResponse, CancelResponse, ListBuildsQuery,
    ProgressRequest, SubmitResponse,
};
use crate::service::BuildService;
use crate::state::AppState;

/// Submit a build.
pub async fn submit_build(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BuildRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let Json(request) = payload?;
    let build = BuildService::new(state).submit(request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            build_id: build.id,
            status: build.status,
        }),
    ))
}

/// List builds, optionally filtered by status.
pub async fn list_builds(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListBuildsQuery>, QueryRejection>,
) -> Result<Json<BuildListResponse>, ApiError> {
    let Query(query) = query?;
    let status = query
        .status
        .as_deref()
        .map(str::parse::<BuildStatus>)
        .transpose()
        .map_err(ApiError::bad_request)?;

    let builds = BuildService::new(state).list(status, query.limit).await;
    Ok(Json(BuildListResponse { builds }))
}

/// Full build record.
pub async fn get_build(
    State(state): State<Arc<AppState>>,
    Path(build_id): Path<BuildId>,
) -> Result<Json<Build>, ApiError> {
    let build = BuildService::new(state).status(&build_id).await?;
    Ok(Json(build))
}

/// Status poll.
pub async fn build_status(
    State(state): State<Arc<AppState>>,
    Path(build_id): Path<BuildId>,
) -> Result<Json<BuildStatusResponse>, ApiError> {
    let build = BuildService::new(state).status(&build_id).await?;
    Ok(Json(BuildStatusResponse::from(&build)))
}

/// Cancel a build. Repeating the request returns the same answer for as long
/// as the build is retained; once evicted from history it answers 404.
pub async fn cancel_build(
    State(state): State<Arc<AppState>>,
    Path(build_id): Path<BuildId>,
) -> Result<Json<CancelResponse>, ApiError> {
    let outcome = BuildService::new(state).cancel(&build_id).await?;
    Ok(Json(CancelResponse {
        success: true,
        status: outcome.status,
    }))
}

pub async fn report_progress(
    State(state): State<Arc<AppState>>,
    Path(build_id): Path<BuildId>,
    payload: Result<Json<ProgressRequest>, JsonRejection>,
) -> Result<Json<AcceptedResponse>, ApiError> {
    let Json(request) = payload?;
    let accepted = BuildService::new(state)
        .progress(&build_id, &request.worker_id, request.progress)
        .await?;
    Ok(Json(AcceptedResponse { accepted }))
}

pub async fn report_completion(
    State(state): State<Arc<AppState>>,
    Path(build_id): Path<BuildId>,
    payload: Result<Json<BuildReport>, JsonRejection>,
) -> Result<Json<AcceptedResponse>, ApiError> {
    let Json(report) = payload?;
    let accepted = BuildService::new(state).complete(&build_id, report).await?;
    Ok(Json(AcceptedResponse { accepted }))
}
