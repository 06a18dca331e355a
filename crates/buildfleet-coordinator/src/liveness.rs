//! Liveness monitor - demotes workers whose heartbeats stopped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use buildfleet_core::build::MAX_RETRIES_EXCEEDED;
use buildfleet_core::{BuildId, BuildStatus, CoordinatorEvent, WorkerId, WorkerStatus};

use crate::lifecycle::LostOutcome;
use crate::state::AppState;

/// What one scan did.
#[derive(Debug, Default, PartialEq)]
pub struct ScanReport {
    /// Workers marked offline.
    pub offline: Vec<WorkerId>,
    /// Builds sent back to the queue.
    pub requeued: Vec<BuildId>,
    /// Builds failed because their retries ran out.
    pub failed: Vec<BuildId>,
}

/// Periodic heartbeat check.
pub struct LivenessMonitor {
    state: Arc<AppState>,
}

impl LivenessMonitor {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Demote every worker whose last heartbeat is older than the timeout and
    /// recover the builds it held.
    pub async fn scan(&self, now: DateTime<Utc>) -> ScanReport {
        let timeout = self.state.config.heartbeat_timeout();
        let mut report = ScanReport::default();

        {
            let (mut builds, mut workers) = self.state.lock_all().await;
            for worker_id in workers.stale_workers(now, timeout) {
                let held = match workers.mark_offline(&worker_id) {
                    Ok(held) => held,
                    Err(e) => {
                        error!(worker_id = %worker_id, error = %e, "Failed to mark worker offline");
                        continue;
                    }
                };

                for build_id in held {
                    match builds.worker_lost(&build_id, &worker_id) {
                        LostOutcome::Requeued { retry_count } => {
                            info!(
                                build_id = %build_id,
                                worker_id = %worker_id,
                                retry_count,
                                "Requeued build from lost worker"
                            );
                            report.requeued.push(build_id);
                        }
                        LostOutcome::Failed => {
                            warn!(
                                build_id = %build_id,
                                worker_id = %worker_id,
                                "Build exhausted its retries"
                            );
                            report.failed.push(build_id);
                        }
                        LostOutcome::NotHeld => {}
                    }
                }
                report.offline.push(worker_id);
            }
        }

        if report.offline.is_empty() {
            return report;
        }

        for worker_id in &report.offline {
            self.state.publish(CoordinatorEvent::worker_status(
                worker_id.clone(),
                WorkerStatus::Offline,
            ));
        }
        for build_id in &report.failed {
            self.state.publish(CoordinatorEvent::build_finished(
                build_id.clone(),
                BuildStatus::Failed,
                0,
                Some(MAX_RETRIES_EXCEEDED.to_string()),
            ));
        }
        self.state.request_save();
        if !report.requeued.is_empty() {
            self.state.wake_scheduler();
        }

        report
    }

    /// Scan on a fixed interval until the token is cancelled.
    pub async fn run(self, token: CancellationToken) {
        let interval = self.state.config.liveness_interval();
        info!(
            interval_secs = interval.as_secs(),
            timeout_secs = self.state.config.heartbeat_timeout_secs,
            "Liveness monitor started"
        );

        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.scan(Utc::now()).await;
                }
            }
        }

        info!("Liveness monitor stopped");
    }
}
