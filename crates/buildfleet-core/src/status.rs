//! Status enums for Builds and Workers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a Build in the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    /// Waiting in the priority queue for a worker.
    #[default]
    Queued,
    /// Worker selected, dispatch in flight.
    Assigned,
    /// Worker acknowledged the task and is executing it.
    Running,
    /// Worker reported success (or the cache had the artifacts).
    Completed,
    /// Worker reported failure, or retries were exhausted.
    Failed,
    /// Cancelled by a client.
    Cancelled,
}

impl BuildStatus {
    /// Returns true if the build is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the build currently holds a worker slot.
    pub fn holds_worker(&self) -> bool {
        matches!(self, Self::Assigned | Self::Running)
    }

    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Assigned => "assigned",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queued" => Ok(Self::Queued),
            "assigned" => Ok(Self::Assigned),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown build status '{other}'")),
        }
    }
}

/// Status of a registered Worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Worker has at least one free slot.
    #[default]
    Available,
    /// Worker is running at capacity.
    Busy,
    /// Worker missed its heartbeat deadline.
    Offline,
}

impl WorkerStatus {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Busy => "busy",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
