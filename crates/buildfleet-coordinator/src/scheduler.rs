//! Build scheduler - matches queued builds to free worker slots.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use buildfleet_core::{BuildId, CoordinatorEvent, TaskDescriptor, WorkerId};

use crate::state::AppState;

/// A build bound to a worker slot, waiting to be delivered.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub build_id: BuildId,
    pub worker_id: WorkerId,
    pub attempt: u32,
    pub address: String,
    pub task: TaskDescriptor,
}

/// Outcome of one scheduling pass.
#[derive(Debug, Default)]
pub struct PassSummary {
    /// New assignments, already recorded on both sides.
    pub assignments: Vec<Assignment>,
    /// Builds still waiting for a worker after the pass.
    pub queued: usize,
}

/// Build scheduler.
#[derive(Clone)]
pub struct Scheduler {
    state: Arc<AppState>,
}

impl Scheduler {
    /// Create a new Scheduler.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Assign as many queued builds as free capacity allows.
    ///
    /// Runs under both locks so worker selection, slot reservation and the
    /// build's transition to assigned happen atomically. Builds that no free
    /// worker can run are set aside and pushed back after the pass, so they
    /// do not block lower-priority builds that someone else can run.
    pub async fn schedule_pass(&self) -> PassSummary {
        let timeout_secs = self.state.config.build_timeout_secs;
        let (mut builds, mut workers) = self.state.lock_all().await;

        let mut assignments = Vec::new();
        let mut deferred = Vec::new();

        while workers.has_free_slot() {
            let Some(entry) = builds.pop_queued() else {
                break;
            };
            let Some(task) = builds.get(&entry.build_id).map(|b| b.task.clone()) else {
                continue;
            };

            let Some(worker_id) = workers.select_worker(&task) else {
                deferred.push(entry);
                continue;
            };
            let Some(address) = workers.get(&worker_id).map(|w| w.info.address.clone()) else {
                deferred.push(entry);
                continue;
            };

            if let Err(e) = workers.mark_busy(&worker_id, &entry.build_id) {
                warn!(worker_id = %worker_id, error = %e, "Selected worker refused the slot");
                deferred.push(entry);
                continue;
            }

            match builds.assign(&entry.build_id, &worker_id) {
                Ok(build) => {
                    info!(
                        build_id = %build.id,
                        worker_id = %worker_id,
                        task = %build.task,
                        priority = build.priority,
                        "Assigning build to worker"
                    );
                    assignments.push(Assignment {
                        build_id: build.id.clone(),
                        worker_id,
                        attempt: build.attempt,
                        address,
                        task: build.descriptor(timeout_secs),
                    });
                }
                Err(e) => {
                    error!(build_id = %entry.build_id, error = %e, "Failed to assign build");
                    if let Err(e) = workers.mark_available(&worker_id, &entry.build_id) {
                        error!(worker_id = %worker_id, error = %e, "Failed to release worker slot");
                    }
                }
            }
        }

        if !deferred.is_empty() {
            debug!(count = deferred.len(), "No eligible worker for some builds");
        }
        for entry in deferred {
            builds.push_back(entry);
        }

        PassSummary {
            assignments,
            queued: builds.queued_len(),
        }
    }

    /// Deliver an assignment to its worker.
    ///
    /// On acknowledgement the build starts running. If the worker cannot be
    /// reached the assignment is rolled back without counting a retry.
    pub async fn dispatch_assignment(&self, assignment: Assignment) {
        let Assignment {
            build_id,
            worker_id,
            attempt,
            address,
            task,
        } = assignment;

        match self.state.dispatcher.dispatch(&address, &task).await {
            Ok(()) => {
                let started = self
                    .state
                    .builds
                    .write()
                    .await
                    .acknowledge(&build_id, &worker_id, attempt);
                if started {
                    debug!(build_id = %build_id, worker_id = %worker_id, "Worker accepted build");
                    self.state.publish(CoordinatorEvent::build_started(
                        build_id,
                        worker_id,
                        task.task,
                    ));
                }
            }
            Err(e) => {
                warn!(
                    build_id = %build_id,
                    worker_id = %worker_id,
                    attempt,
                    error = %e,
                    "Failed to deliver build, returning it to the queue"
                );
                {
                    let (mut builds, mut workers) = self.state.lock_all().await;
                    if builds.rollback_assignment(&build_id, &worker_id, attempt) {
                        if let Err(e) = workers.mark_available(&worker_id, &build_id) {
                            error!(
                                worker_id = %worker_id,
                                error = %e,
                                "Failed to release worker slot"
                            );
                        }
                    }
                }
                tokio::time::sleep(self.state.config.schedule_retry()).await;
                self.state.wake_scheduler();
            }
        }
    }

    /// Run until the token is cancelled.
    ///
    /// A pass runs on every wakeup; while builds are left waiting, the loop
    /// also retries on a fixed interval.
    pub async fn run(self, token: CancellationToken) {
        let retry = self.state.config.schedule_retry();
        info!(retry_ms = retry.as_millis() as u64, "Scheduler started");

        loop {
            let summary = self.schedule_pass().await;
            for assignment in summary.assignments {
                let scheduler = self.clone();
                tokio::spawn(async move { scheduler.dispatch_assignment(assignment).await });
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.state.scheduler_woken() => {}
                _ = tokio::time::sleep(retry), if summary.queued > 0 => {}
            }
        }

        info!("Scheduler stopped");
    }
}
