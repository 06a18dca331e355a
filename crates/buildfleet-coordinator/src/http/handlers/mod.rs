//! HTTP request handlers.

mod builds;
mod health;
mod workers;

pub use builds::{
    build_status, cancel_build, get_build, list_builds, report_completion, report_progress,
    submit_build,
};
pub use health::{health_check, metrics_handler, metrics_json};
pub use workers::{heartbeat, list_workers, register_worker};
