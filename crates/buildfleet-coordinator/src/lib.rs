//! BuildFleet Coordinator Library
//!
//! This crate provides the build coordinator: the worker registry, priority
//! queue and build lifecycle, the scheduler and liveness loops, snapshot
//! persistence, collaborator clients and the HTTP API.

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod http;
pub mod lifecycle;
pub mod liveness;
pub mod metrics;
pub mod monitor;
pub mod persistence;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod shutdown;
pub mod state;

pub use config::Config;
pub use lifecycle::BuildTable;
pub use liveness::LivenessMonitor;
pub use persistence::{SnapshotStore, Snapshotter};
pub use registry::WorkerRegistry;
pub use scheduler::Scheduler;
pub use service::{BuildService, WorkerService};
pub use state::AppState;
