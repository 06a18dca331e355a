//! Build operations exposed to clients and workers.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, warn};

use buildfleet_core::build::CANCELLED;
use buildfleet_core::{
    Build, BuildId, BuildReport, BuildRequest, BuildStatus, CoordinatorEvent, CoreError, WorkerId,
};

use crate::cache::{cache_key, CachedArtifacts};
use crate::lifecycle::{CancelOutcome, ReportOutcome};
use crate::state::AppState;

/// Default page size for build listings.
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Build lifecycle operations.
#[derive(Clone)]
pub struct BuildService {
    state: Arc<AppState>,
}

impl BuildService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Validate and queue a build, then wake the scheduler.
    ///
    /// Cache-enabled builds are looked up in the background; a hit completes
    /// the build before it ever reaches a worker.
    pub async fn submit(&self, request: BuildRequest) -> Result<Build, CoreError> {
        let build = {
            let mut builds = self.state.builds.write().await;
            builds.submit(request)?.clone()
        };

        if build.cache_enabled {
            if let Some(cache) = self.state.cache.clone() {
                let state = self.state.clone();
                let build_id = build.id.clone();
                let key = cache_key(&build);
                tokio::spawn(async move {
                    match cache.get(&key).await {
                        Ok(Some(hit)) => apply_cache_hit(&state, &build_id, hit).await,
                        Ok(None) => debug!(build_id = %build_id, key = %key, "Cache miss"),
                        Err(e) => warn!(build_id = %build_id, error = %e, "Cache lookup failed"),
                    }
                });
            }
        }

        self.state.wake_scheduler();
        Ok(build)
    }

    pub async fn status(&self, build_id: &BuildId) -> Result<Build, CoreError> {
        let builds = self.state.builds.read().await;
        builds.require(build_id).cloned()
    }

    pub async fn list(&self, status: Option<BuildStatus>, limit: Option<usize>) -> Vec<Build> {
        let builds = self.state.builds.read().await;
        builds
            .list(status, limit.unwrap_or(DEFAULT_LIST_LIMIT))
            .into_iter()
            .cloned()
            .collect()
    }

    /// Cancel a build. Cancelling a terminal build changes nothing.
    pub async fn cancel(&self, build_id: &BuildId) -> Result<CancelOutcome, CoreError> {
        let (outcome, abandon_address) = {
            let (mut builds, mut workers) = self.state.lock_all().await;
            let outcome = builds.cancel(build_id)?;

            let mut address = None;
            if let Some(worker_id) = &outcome.released_worker {
                if let Err(e) = workers.mark_available(worker_id, build_id) {
                    error!(worker_id = %worker_id, error = %e, "Failed to release worker slot");
                }
                address = workers.get(worker_id).map(|w| w.info.address.clone());
            }
            (outcome, address)
        };

        if !outcome.changed {
            return Ok(outcome);
        }

        self.state.publish(CoordinatorEvent::build_finished(
            build_id.clone(),
            BuildStatus::Cancelled,
            0,
            Some(CANCELLED.to_string()),
        ));
        self.state.request_save();

        if let Some(worker_id) = outcome.released_worker.clone() {
            self.state.wake_scheduler();
            if let Some(address) = abandon_address {
                let dispatcher = self.state.dispatcher.clone();
                let build_id = build_id.clone();
                tokio::spawn(async move {
                    if let Err(e) = dispatcher.abandon(&address, &build_id).await {
                        warn!(
                            build_id = %build_id,
                            worker_id = %worker_id,
                            error = %e,
                            "Worker did not confirm abandon"
                        );
                    }
                });
            }
        }

        Ok(outcome)
    }

    /// Record progress from the worker running a build.
    ///
    /// Returns false when the report is stale and was ignored.
    pub async fn progress(
        &self,
        build_id: &BuildId,
        worker_id: &WorkerId,
        progress: f64,
    ) -> Result<bool, CoreError> {
        if !progress.is_finite() {
            return Err(CoreError::invalid("progress must be a number"));
        }

        let (accepted, started) = {
            let mut builds = self.state.builds.write().await;
            let was_assigned = builds
                .get(build_id)
                .is_some_and(|b| b.status == BuildStatus::Assigned);
            let accepted = builds.record_progress(build_id, worker_id, progress)?;
            let started = if accepted && was_assigned {
                builds.get(build_id).map(|b| b.task.clone())
            } else {
                None
            };
            (accepted, started)
        };

        if let Some(task) = started {
            self.state.publish(CoordinatorEvent::build_started(
                build_id.clone(),
                worker_id.clone(),
                task,
            ));
        }
        Ok(accepted)
    }

    /// Apply a worker's completion report.
    ///
    /// Returns false when the report is stale and was ignored.
    pub async fn complete(
        &self,
        build_id: &BuildId,
        report: BuildReport,
    ) -> Result<bool, CoreError> {
        let finished = {
            let (mut builds, mut workers) = self.state.lock_all().await;
            match builds.complete(build_id, report)? {
                ReportOutcome::Stale => None,
                ReportOutcome::Finished { worker_id, .. } => {
                    if let Err(e) = workers.mark_available(&worker_id, build_id) {
                        error!(worker_id = %worker_id, error = %e, "Failed to release worker slot");
                    }
                    builds.get(build_id).cloned()
                }
            }
        };

        let Some(build) = finished else {
            return Ok(false);
        };

        let result = build.result.clone().unwrap_or_default();
        self.state.publish(CoordinatorEvent::build_finished(
            build.id.clone(),
            build.status,
            result.duration_ms,
            result.error.clone(),
        ));
        self.state.request_save();
        self.state.wake_scheduler();

        if build.cache_enabled && build.status == BuildStatus::Completed {
            if let Some(cache) = self.state.cache.clone() {
                tokio::spawn(async move {
                    let key = cache_key(&build);
                    let data = CachedArtifacts {
                        artifacts: result.artifacts,
                    };
                    let metadata = HashMap::from([
                        ("build_id".to_string(), build.id.to_string()),
                        ("project".to_string(), build.project.clone()),
                        ("task".to_string(), build.task.clone()),
                        ("duration_ms".to_string(), result.duration_ms.to_string()),
                    ]);
                    if let Err(e) = cache.put(&key, &data, metadata).await {
                        warn!(
                            build_id = %build.id,
                            error = %e,
                            "Failed to store artifacts in cache"
                        );
                    }
                });
            }
        }

        Ok(true)
    }
}

async fn apply_cache_hit(state: &AppState, build_id: &BuildId, hit: CachedArtifacts) {
    let completed = {
        let mut builds = state.builds.write().await;
        builds.complete_from_cache(build_id, hit.artifacts)
    };

    if completed {
        state.publish(CoordinatorEvent::build_finished(
            build_id.clone(),
            BuildStatus::Completed,
            0,
            None,
        ));
        state.request_save();
    } else {
        debug!(build_id = %build_id, "Cache hit arrived after the build left the queue");
    }
}
