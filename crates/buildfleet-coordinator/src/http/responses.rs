//! HTTP request and response types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use buildfleet_core::{Build, BuildId, BuildStatus, WorkerId, WorkerStatus};

use crate::registry::WorkerRecord;

// ============================================================================
// Error types
// ============================================================================

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Build types
// ============================================================================

/// Response body for a submission.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub build_id: BuildId,
    pub status: BuildStatus,
}

/// Response body for a status poll.
#[derive(Debug, Serialize, Deserialize)]
pub struct BuildStatusResponse {
    pub build_id: BuildId,
    pub status: BuildStatus,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,
    pub retry_count: u32,
}

impl From<&Build> for BuildStatusResponse {
    fn from(build: &Build) -> Self {
        Self {
            build_id: build.id.clone(),
            status: build.status,
            progress: build.progress,
            error: build.error().map(str::to_string),
            worker_id: build.worker_id.clone(),
            retry_count: build.retry_count,
        }
    }
}

/// Query parameters for listing builds.
#[derive(Debug, Default, Deserialize)]
pub struct ListBuildsQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct BuildListResponse {
    pub builds: Vec<Build>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub success: bool,
    pub status: BuildStatus,
}

/// Progress report from the worker running a build.
#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub worker_id: WorkerId,
    pub progress: f64,
}

/// Whether a worker report was applied. Stale reports are not errors.
#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub accepted: bool,
}

// ============================================================================
// Worker types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterWorkerResponse {
    pub worker_id: WorkerId,
    pub success: bool,
}

/// Heartbeat body. Resource figures are advisory.
#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: WorkerId,
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub memory_usage: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Response for a single worker.
#[derive(Debug, Serialize)]
pub struct WorkerResponse {
    pub worker_id: WorkerId,
    pub address: String,
    pub status: WorkerStatus,
    pub capacity: u32,
    pub active_builds: u32,
    pub builds: Vec<BuildId>,
    pub capabilities: Vec<String>,
    pub labels: HashMap<String, String>,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub last_heartbeat: String,
    pub registered_at: String,
}

impl From<WorkerRecord> for WorkerResponse {
    fn from(record: WorkerRecord) -> Self {
        Self {
            active_builds: record.active_count(),
            capacity: record.capacity(),
            status: record.status,
            builds: record.active_builds.into_iter().collect(),
            worker_id: record.info.worker_id,
            address: record.info.address,
            capabilities: record.info.capabilities,
            labels: record.info.labels,
            cpu_usage: record.resources.cpu_usage,
            memory_usage: record.resources.memory_usage,
            last_heartbeat: record.last_heartbeat.to_rfc3339(),
            registered_at: record.registered_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WorkerListResponse {
    pub workers: Vec<WorkerResponse>,
}
