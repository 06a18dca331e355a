//! Worker information types.

use crate::{CoreError, WorkerId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What a worker declares about itself when it registers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    /// Unique worker identifier.
    pub worker_id: WorkerId,

    /// Base URL of the worker's execution endpoint.
    pub address: String,

    /// Maximum number of concurrent builds.
    pub capacity: u32,

    /// Task names this worker can run. Empty means any task.
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Worker-level labels (region, hardware, etc.).
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl WorkerInfo {
    /// Create a new WorkerInfo that accepts any task.
    pub fn new(worker_id: impl Into<WorkerId>, address: impl Into<String>, capacity: u32) -> Self {
        Self {
            worker_id: worker_id.into(),
            address: address.into(),
            capacity,
            capabilities: Vec::new(),
            labels: HashMap::new(),
        }
    }

    /// Check if this worker can run a given task.
    pub fn supports_task(&self, task: &str) -> bool {
        self.capabilities.is_empty() || self.capabilities.iter().any(|c| c == task || c == "*")
    }

    /// Builder method to add a capability.
    pub fn with_capability(mut self, task: impl Into<String>) -> Self {
        self.capabilities.push(task.into());
        self
    }

    /// Check the fields the registry depends on.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.worker_id.as_str().trim().is_empty() {
            return Err(CoreError::invalid("worker_id is required"));
        }
        if self.address.trim().is_empty() {
            return Err(CoreError::invalid("address is required"));
        }
        if self.capacity == 0 {
            return Err(CoreError::invalid("capacity must be at least 1"));
        }
        Ok(())
    }
}

/// Resource usage reported with each heartbeat. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// CPU utilisation as a fraction (0.0 - 1.0).
    #[serde(default)]
    pub cpu_usage: f64,

    /// Memory utilisation as a fraction (0.0 - 1.0).
    #[serde(default)]
    pub memory_usage: f64,
}
