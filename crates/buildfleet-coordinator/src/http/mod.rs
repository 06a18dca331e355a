//! HTTP server for the coordinator.
//!
//! Provides endpoints for:
//! - Build submission, polling, listing and cancellation (`/api/builds`)
//! - Worker progress and completion reports (`/api/builds/:id/progress`,
//!   `/api/builds/:id/complete`)
//! - Worker registration and heartbeats (`/api/workers`)
//! - Counters (`/api/metrics`)
//! - Health check (`/health`)
//! - Prometheus metrics (`/metrics`)

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod error;
mod handlers;
pub mod responses;

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Build routes
        .route(
            "/api/builds",
            post(handlers::submit_build).get(handlers::list_builds),
        )
        .route(
            "/api/builds/:id",
            get(handlers::get_build).delete(handlers::cancel_build),
        )
        .route("/api/builds/:id/status", get(handlers::build_status))
        .route("/api/builds/:id/progress", post(handlers::report_progress))
        .route("/api/builds/:id/complete", post(handlers::report_completion))
        // Worker routes
        .route(
            "/api/workers",
            post(handlers::register_worker).get(handlers::list_workers),
        )
        .route("/api/workers/heartbeat", post(handlers::heartbeat))
        // Observability routes
        .route("/api/metrics", get(handlers::metrics_json))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::scheduler::Scheduler;
    use crate::state::testing::test_state;

    async fn call(
        router: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn submit(router: &Router, body: Value) -> String {
        let (status, value) = call(router, Method::POST, "/api/builds", Some(body)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        value["build_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _) = test_state();
        let router = create_router(state);
        let (status, body) = call(&router, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_submit_and_poll() {
        let (state, _) = test_state();
        let router = create_router(state);

        let (status, body) = call(
            &router,
            Method::POST,
            "/api/builds",
            Some(json!({ "project": "app", "task": "compile", "priority": 2 })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "queued");

        let id = body["build_id"].as_str().unwrap();
        let uri = format!("/api/builds/{id}/status");
        let (status, body) = call(&router, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "queued");
        assert_eq!(body["retry_count"], 0);
        assert!(body.get("worker_id").is_none());
    }

    #[tokio::test]
    async fn test_invalid_submission() {
        let (state, _) = test_state();
        let router = create_router(state);

        let (status, body) = call(
            &router,
            Method::POST,
            "/api/builds",
            Some(json!({ "project": "app", "task": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("task"));

        let bad = json!({ "task": 1 });
        let (status, body) = call(&router, Method::POST, "/api/builds", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_build_is_404() {
        let (state, _) = test_state();
        let router = create_router(state);

        let (status, body) = call(&router, Method::GET, "/api/builds/nope/status", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());

        let (status, _) = call(&router, Method::DELETE, "/api/builds/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cancel_twice_gives_same_answer() {
        let (state, _) = test_state();
        let router = create_router(state);
        let id = submit(&router, json!({ "project": "app", "task": "compile" })).await;

        let first = call(&router, Method::DELETE, &format!("/api/builds/{id}"), None).await;
        let second = call(&router, Method::DELETE, &format!("/api/builds/{id}"), None).await;

        assert_eq!(first.0, StatusCode::OK);
        assert_eq!(first.1, json!({ "success": true, "status": "cancelled" }));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_cancelled_build_ignores_late_report() {
        let (state, _) = test_state();
        let router = create_router(state);
        let id = submit(&router, json!({ "project": "app", "task": "compile" })).await;

        call(&router, Method::DELETE, &format!("/api/builds/{id}"), None).await;
        let (_, body) = call(&router, Method::GET, &format!("/api/builds/{id}/status"), None).await;
        assert_eq!(body["status"], "cancelled");
        assert_eq!(body["error"], "cancelled");

        let (status, body) = call(
            &router,
            Method::POST,
            &format!("/api/builds/{id}/complete"),
            Some(json!({ "worker_id": "w1", "success": true, "duration_ms": 5 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "accepted": false }));

        let (_, body) = call(&router, Method::GET, &format!("/api/builds/{id}/status"), None).await;
        assert_eq!(body["status"], "cancelled");
    }

    #[tokio::test]
    async fn test_worker_registration_and_heartbeat() {
        let (state, _) = test_state();
        let router = create_router(state);
        let worker = json!({
            "worker_id": "w1",
            "address": "http://w1:9000",
            "capacity": 2,
            "capabilities": ["compile"]
        });

        let (status, body) =
            call(&router, Method::POST, "/api/workers", Some(worker.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, json!({ "worker_id": "w1", "success": true }));

        let (status, _) = call(&router, Method::POST, "/api/workers", Some(worker)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(
            &router,
            Method::POST,
            "/api/workers/heartbeat",
            Some(json!({ "worker_id": "w1", "cpu_usage": 0.3 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));

        let (status, _) = call(
            &router,
            Method::POST,
            "/api/workers/heartbeat",
            Some(json!({ "worker_id": "ghost" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = call(&router, Method::GET, "/api/workers", None).await;
        let workers = body["workers"].as_array().unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0]["status"], "available");
        assert_eq!(workers[0]["capacity"], 2);
        assert_eq!(workers[0]["cpu_usage"], 0.3);
    }

    #[tokio::test]
    async fn test_full_build_over_http() {
        let (state, dispatcher) = test_state();
        let router = create_router(state.clone());
        call(
            &router,
            Method::POST,
            "/api/workers",
            Some(json!({ "worker_id": "w1", "address": "http://w1:9000", "capacity": 1 })),
        )
        .await;
        let id = submit(&router, json!({ "project": "app", "task": "compile" })).await;

        let scheduler = Scheduler::new(state.clone());
        for assignment in scheduler.schedule_pass().await.assignments {
            scheduler.dispatch_assignment(assignment).await;
        }
        assert_eq!(dispatcher.dispatched_builds().len(), 1);

        let (_, body) = call(
            &router,
            Method::POST,
            &format!("/api/builds/{id}/progress"),
            Some(json!({ "worker_id": "w1", "progress": 0.5 })),
        )
        .await;
        assert_eq!(body, json!({ "accepted": true }));

        let (_, body) = call(&router, Method::GET, &format!("/api/builds/{id}/status"), None).await;
        assert_eq!(body["status"], "running");
        assert_eq!(body["worker_id"], "w1");
        assert_eq!(body["progress"], 0.5);

        let (_, body) = call(
            &router,
            Method::POST,
            &format!("/api/builds/{id}/complete"),
            Some(json!({
                "worker_id": "w1",
                "success": true,
                "artifacts": ["dist/app.tar.gz"],
                "duration_ms": 1500
            })),
        )
        .await;
        assert_eq!(body, json!({ "accepted": true }));

        let (_, build) = call(&router, Method::GET, &format!("/api/builds/{id}"), None).await;
        assert_eq!(build["status"], "completed");
        assert_eq!(build["result"]["artifacts"], json!(["dist/app.tar.gz"]));

        let (_, metrics) = call(&router, Method::GET, "/api/metrics", None).await;
        assert_eq!(metrics["total"], 1);
        assert_eq!(metrics["completed"], 1);
        assert_eq!(metrics["active"], 0);
        assert_eq!(metrics["workers"]["available"], 1);
    }

    #[tokio::test]
    async fn test_list_builds_with_filter() {
        let (state, _) = test_state();
        let router = create_router(state);
        let first = submit(&router, json!({ "project": "app", "task": "compile" })).await;
        submit(&router, json!({ "project": "app", "task": "test" })).await;
        call(&router, Method::DELETE, &format!("/api/builds/{first}"), None).await;

        let (status, body) = call(&router, Method::GET, "/api/builds?status=queued", None).await;
        assert_eq!(status, StatusCode::OK);
        let builds = body["builds"].as_array().unwrap();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0]["task"], "test");

        let (_, body) = call(&router, Method::GET, "/api/builds?limit=1", None).await;
        assert_eq!(body["builds"].as_array().unwrap().len(), 1);

        let (status, _) = call(&router, Method::GET, "/api/builds?status=sleeping", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_prometheus_endpoint() {
        let (state, _) = test_state();
        let router = create_router(state);
        let response = router
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("buildfleet_builds_submitted_total 0"));
    }
}
