//! Health and metrics handlers.

use std::sync::Arc;

use axum::{extract::State, http::header, response::IntoResponse, Json};

use crate::metrics::MetricsSnapshot;
use crate::state::AppState;

/// Health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Counters as JSON.
pub async fn metrics_json(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(MetricsSnapshot::collect(&state).await)
}

/// Prometheus metrics endpoint.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = MetricsSnapshot::collect(&state).await.to_prometheus();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}
