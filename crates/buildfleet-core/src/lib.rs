//! BuildFleet Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Persistence
//! - Runtime specifics
//!
//! All types here represent the core business domain of BuildFleet:
//! builds submitted by clients and the workers that execute them.

pub mod build;
pub mod error;
pub mod event;
pub mod ids;
pub mod status;
pub mod worker;

// Re-export commonly used types
pub use build::{Build, BuildReport, BuildRequest, BuildResult, TaskDescriptor};
pub use error::CoreError;
pub use event::CoordinatorEvent;
pub use ids::{BuildId, WorkerId};
pub use status::{BuildStatus, WorkerStatus};
pub use worker::{ResourceUsage, WorkerInfo};
