//! Coordinator operations shared by the HTTP handlers.

pub mod builds;
pub mod workers;

pub use builds::BuildService;
pub use workers::WorkerService;
