//! Core domain errors.

use thiserror::Error;

use crate::{BuildStatus, WorkerId};

/// Core domain errors for BuildFleet.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Malformed or incomplete request. Never retried.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Build not found (never submitted, or evicted from history).
    #[error("Build not found: {0}")]
    UnknownBuild(String),

    /// Worker not registered.
    #[error("Worker not found: {0}")]
    UnknownWorker(String),

    /// A worker with this identifier is already registered.
    #[error("Worker already registered: {0}")]
    DuplicateWorker(String),

    /// Worker has no free slot. Internal; the build is requeued.
    #[error("Worker '{worker}' is at capacity ({capacity})")]
    CapacityExceeded { worker: WorkerId, capacity: u32 },

    /// Invalid build state transition.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: BuildStatus, to: BuildStatus },
}

impl CoreError {
    /// Shorthand for [`CoreError::InvalidRequest`].
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }
}
