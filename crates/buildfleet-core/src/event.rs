//! Coordinator events published to the monitor.

use crate::{BuildId, BuildStatus, WorkerId, WorkerStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Notification emitted by the coordinator. Delivery is fire-and-forget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    /// A worker acknowledged a build and started executing it.
    BuildStarted {
        build_id: BuildId,
        worker_id: WorkerId,
        task: String,
        timestamp: DateTime<Utc>,
    },
    /// A build reached a terminal state.
    BuildFinished {
        build_id: BuildId,
        status: BuildStatus,
        duration_ms: u64,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// A worker registered, went offline, or came back.
    WorkerStatusChanged {
        worker_id: WorkerId,
        status: WorkerStatus,
        timestamp: DateTime<Utc>,
    },
}

impl CoordinatorEvent {
    /// Create a BuildStarted event.
    pub fn build_started(build_id: BuildId, worker_id: WorkerId, task: impl Into<String>) -> Self {
        Self::BuildStarted {
            build_id,
            worker_id,
            task: task.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a BuildFinished event.
    pub fn build_finished(
        build_id: BuildId,
        status: BuildStatus,
        duration_ms: u64,
        error: Option<String>,
    ) -> Self {
        Self::BuildFinished {
            build_id,
            status,
            duration_ms,
            error,
            timestamp: Utc::now(),
        }
    }

    /// Create a WorkerStatusChanged event.
    pub fn worker_status(worker_id: WorkerId, status: WorkerStatus) -> Self {
        Self::WorkerStatusChanged {
            worker_id,
            status,
            timestamp: Utc::now(),
        }
    }

    /// Event name as sent on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BuildStarted { .. } => "build_started",
            Self::BuildFinished { .. } => "build_finished",
            Self::WorkerStatusChanged { .. } => "worker_status_changed",
        }
    }
}
