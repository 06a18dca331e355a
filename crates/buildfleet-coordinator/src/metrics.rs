//! Coordinator metrics.
//!
//! The same numbers are served as JSON (`/api/metrics`) and in Prometheus
//! text exposition format (`/metrics`).

use std::fmt::Write;

use serde::Serialize;

use crate::registry::WorkerCounts;
use crate::state::AppState;

/// Build and worker counters.
///
/// `total`, `completed`, `failed` and `cancelled` are lifetime counts and
/// survive history eviction; `queued` and `active` describe the present.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total: u64,
    pub queued: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub retried: u64,
    pub cache_hits: u64,
    pub workers: WorkerCounts,
}

impl MetricsSnapshot {
    pub async fn collect(state: &AppState) -> Self {
        let builds = state.builds.read().await;
        let workers = state.workers.read().await;
        let counters = builds.counters();
        let statuses = builds.status_counts();

        Self {
            total: counters.submitted,
            queued: statuses.queued as u64,
            active: statuses.active() as u64,
            completed: counters.completed,
            failed: counters.failed,
            cancelled: counters.cancelled,
            retried: counters.retried,
            cache_hits: counters.cache_hits,
            workers: workers.counts(),
        }
    }

    /// Format as Prometheus text.
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        writeln!(
            output,
            "# HELP buildfleet_builds_submitted_total Builds accepted since the first start"
        )
        .ok();
        writeln!(output, "# TYPE buildfleet_builds_submitted_total counter").ok();
        writeln!(output, "buildfleet_builds_submitted_total {}", self.total).ok();

        writeln!(output).ok();
        writeln!(
            output,
            "# HELP buildfleet_builds_finished_total Builds that reached a terminal state"
        )
        .ok();
        writeln!(output, "# TYPE buildfleet_builds_finished_total counter").ok();
        writeln!(
            output,
            "buildfleet_builds_finished_total{{status=\"completed\"}} {}",
            self.completed
        )
        .ok();
        writeln!(
            output,
            "buildfleet_builds_finished_total{{status=\"failed\"}} {}",
            self.failed
        )
        .ok();
        writeln!(
            output,
            "buildfleet_builds_finished_total{{status=\"cancelled\"}} {}",
            self.cancelled
        )
        .ok();

        writeln!(output).ok();
        writeln!(output, "# HELP buildfleet_builds Builds waiting or in flight").ok();
        writeln!(output, "# TYPE buildfleet_builds gauge").ok();
        writeln!(output, "buildfleet_builds{{state=\"queued\"}} {}", self.queued).ok();
        writeln!(output, "buildfleet_builds{{state=\"active\"}} {}", self.active).ok();

        writeln!(output).ok();
        writeln!(output, "# TYPE buildfleet_build_retries_total counter").ok();
        writeln!(output, "buildfleet_build_retries_total {}", self.retried).ok();
        writeln!(output, "# TYPE buildfleet_cache_hits_total counter").ok();
        writeln!(output, "buildfleet_cache_hits_total {}", self.cache_hits).ok();

        writeln!(output).ok();
        writeln!(
            output,
            "# HELP buildfleet_workers Registered workers by status"
        )
        .ok();
        writeln!(output, "# TYPE buildfleet_workers gauge").ok();
        writeln!(
            output,
            "buildfleet_workers{{status=\"available\"}} {}",
            self.workers.available
        )
        .ok();
        writeln!(
            output,
            "buildfleet_workers{{status=\"busy\"}} {}",
            self.workers.busy
        )
        .ok();
        writeln!(
            output,
            "buildfleet_workers{{status=\"offline\"}} {}",
            self.workers.offline
        )
        .ok();
        writeln!(output, "# TYPE buildfleet_worker_slots gauge").ok();
        writeln!(
            output,
            "buildfleet_worker_slots{{state=\"total\"}} {}",
            self.workers.capacity
        )
        .ok();
        writeln!(
            output,
            "buildfleet_worker_slots{{state=\"used\"}} {}",
            self.workers.active_builds
        )
        .ok();

        output
    }
}
