//! Build types.

use crate::{BuildId, BuildStatus, CoreError, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Error message recorded when a build exhausts its retries.
pub const MAX_RETRIES_EXCEEDED: &str = "max retries exceeded";

/// Error message recorded on cancelled builds.
pub const CANCELLED: &str = "cancelled";

/// A build submission as sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Project path or identifier.
    pub project: String,

    /// Task to run against the project (also the capability workers must declare).
    pub task: String,

    /// Scheduling priority, higher runs sooner.
    #[serde(default)]
    pub priority: i32,

    /// Whether the artifact cache may satisfy this build.
    #[serde(default)]
    pub cache_enabled: bool,

    /// Opaque build options, passed through to the worker.
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl BuildRequest {
    /// Create a request with default priority and no options.
    pub fn new(project: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            task: task.into(),
            priority: 0,
            cache_enabled: false,
            options: HashMap::new(),
        }
    }

    /// Builder method to set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Builder method to enable the artifact cache.
    pub fn with_cache(mut self) -> Self {
        self.cache_enabled = true;
        self
    }

    /// Builder method to add an option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Check the fields the coordinator depends on. Options are opaque.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.project.trim().is_empty() {
            return Err(CoreError::invalid("project is required"));
        }
        if self.task.trim().is_empty() {
            return Err(CoreError::invalid("task is required"));
        }
        Ok(())
    }
}

/// Outcome of a finished build.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BuildResult {
    pub success: bool,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl BuildResult {
    /// A failed result carrying only an error message.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            artifacts: Vec::new(),
            error: Some(error.into()),
            duration_ms: 0,
        }
    }
}

/// Completion report sent by a worker for a build it was running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    pub worker_id: WorkerId,
    pub success: bool,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
}

/// What a worker receives on its execution endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub build_id: BuildId,
    pub task: String,
    pub project: String,
    pub options: HashMap<String, String>,
    pub timeout_secs: u64,
}

/// A Build tracked by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    /// Unique build identifier.
    pub id: BuildId,

    /// Project path or identifier.
    pub project: String,

    /// Task name.
    pub task: String,

    /// Scheduling priority, higher runs sooner.
    pub priority: i32,

    /// Whether the artifact cache may satisfy this build.
    pub cache_enabled: bool,

    /// Opaque build options.
    #[serde(default)]
    pub options: HashMap<String, String>,

    /// When the build was submitted.
    pub submitted_at: DateTime<Utc>,

    /// Submission order, used to keep equal priorities FIFO.
    pub sequence: u64,

    /// Current build status.
    pub status: BuildStatus,

    /// Progress reported by the worker (0.0 - 1.0).
    #[serde(default)]
    pub progress: f64,

    /// Worker holding this build while assigned/running.
    #[serde(default)]
    pub worker_id: Option<WorkerId>,

    /// Number of times the build was sent back to the queue after losing its worker.
    #[serde(default)]
    pub retry_count: u32,

    /// Assignment attempt, bumped on every assignment. Dispatch results only
    /// apply to the attempt they were sent for.
    #[serde(default)]
    pub attempt: u32,

    /// When the current attempt was assigned.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    /// When the build reached a terminal state.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,

    /// Final outcome, set on terminal states.
    #[serde(default)]
    pub result: Option<BuildResult>,
}

impl Build {
    /// Create a queued build from a validated request.
    pub fn new(request: BuildRequest, sequence: u64) -> Self {
        Self {
            id: BuildId::generate(),
            project: request.project,
            task: request.task,
            priority: request.priority,
            cache_enabled: request.cache_enabled,
            options: request.options,
            submitted_at: Utc::now(),
            sequence,
            status: BuildStatus::Queued,
            progress: 0.0,
            worker_id: None,
            retry_count: 0,
            attempt: 0,
            started_at: None,
            finished_at: None,
            result: None,
        }
    }

    /// Check if the build is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Error message of a finished build, if any.
    pub fn error(&self) -> Option<&str> {
        self.result.as_ref().and_then(|r| r.error.as_deref())
    }

    /// Task descriptor sent to the worker executing this build.
    pub fn descriptor(&self, timeout_secs: u64) -> TaskDescriptor {
        TaskDescriptor {
            build_id: self.id.clone(),
            task: self.task.clone(),
            project: self.project.clone(),
            options: self.options.clone(),
            timeout_secs,
        }
    }

    /// Mark the build as assigned to a worker.
    pub fn assign(&mut self, worker_id: WorkerId) {
        self.status = BuildStatus::Assigned;
        self.worker_id = Some(worker_id);
        self.attempt += 1;
        self.started_at = Some(Utc::now());
        self.progress = 0.0;
    }

    /// Mark the build as running on its assigned worker.
    pub fn start(&mut self) {
        self.status = BuildStatus::Running;
    }

    /// Send the build back to the queue, releasing its worker.
    pub fn requeue(&mut self) {
        self.status = BuildStatus::Queued;
        self.worker_id = None;
        self.started_at = None;
        self.progress = 0.0;
    }

    /// Move the build to a terminal state with the given outcome.
    pub fn finish(&mut self, status: BuildStatus, result: BuildResult) {
        self.status = status;
        self.worker_id = None;
        self.finished_at = Some(Utc::now());
        if status == BuildStatus::Completed {
            self.progress = 1.0;
        }
        self.result = Some(result);
    }
}
