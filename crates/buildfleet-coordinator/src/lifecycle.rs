//! Build lifecycle - the authoritative build table and its state machine.
//!
//! ```text
//! queued -> assigned -> running -> completed | failed
//!   ^          |           |
//!   +----------+-----------+   worker lost (retry_count += 1, or failed)
//!
//! queued | assigned | running -> cancelled
//! ```
//!
//! Every mutation of a [`Build`] goes through [`BuildTable`]. Callers that also
//! touch the worker registry must hold both locks (see `state.rs`).

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use buildfleet_core::build::{CANCELLED, MAX_RETRIES_EXCEEDED};
use buildfleet_core::{
    Build, BuildId, BuildReport, BuildRequest, BuildResult, BuildStatus, CoreError, WorkerId,
};

use crate::queue::{PriorityQueue, QueueEntry};

/// Error recorded when a worker reports failure without a message.
const DEFAULT_FAILURE: &str = "build failed";

/// Lifetime counters. These survive history eviction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCounters {
    #[serde(default)]
    pub submitted: u64,
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub cancelled: u64,
    #[serde(default)]
    pub retried: u64,
    #[serde(default)]
    pub cache_hits: u64,
}

/// Builds currently retained, by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub queued: usize,
    pub assigned: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn active(&self) -> usize {
        self.assigned + self.running
    }
}

/// Result of applying a worker's completion report.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    /// The build reached a terminal state; the worker's slot must be released.
    Finished {
        status: BuildStatus,
        worker_id: WorkerId,
    },
    /// The report does not belong to the build's current attempt.
    Stale,
}

/// Result of the worker-lost transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LostOutcome {
    /// Back in the queue.
    Requeued { retry_count: u32 },
    /// Retries exhausted.
    Failed,
    /// The build was not held by that worker (already finished or cancelled).
    NotHeld,
}

/// Result of a cancellation request.
#[derive(Debug, Clone, PartialEq)]
pub struct CancelOutcome {
    /// Status after the request. Terminal in every case.
    pub status: BuildStatus,
    /// Worker that was running the build and should be told to abandon it.
    pub released_worker: Option<WorkerId>,
    /// False if the build was already terminal.
    pub changed: bool,
}

/// Serializable form of the build table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildTableSnapshot {
    pub builds: Vec<Build>,
    #[serde(default)]
    pub history: Vec<BuildId>,
    #[serde(default)]
    pub next_sequence: u64,
    #[serde(default)]
    pub counters: BuildCounters,
}

/// Owner of every build record.
#[derive(Debug)]
pub struct BuildTable {
    builds: HashMap<BuildId, Build>,
    queue: PriorityQueue,
    history: VecDeque<BuildId>,
    next_sequence: u64,
    counters: BuildCounters,
    max_retries: u32,
    history_limit: usize,
}

impl BuildTable {
    pub fn new(max_retries: u32, history_limit: usize) -> Self {
        Self {
            builds: HashMap::new(),
            queue: PriorityQueue::new(),
            history: VecDeque::new(),
            next_sequence: 1,
            counters: BuildCounters::default(),
            max_retries,
            history_limit,
        }
    }

    /// Validate a request and enqueue a new build.
    pub fn submit(&mut self, request: BuildRequest) -> Result<&Build, CoreError> {
        request.validate()?;

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let build = Build::new(request, sequence);
        let build_id = build.id.clone();
        info!(
            build_id = %build_id,
            project = %build.project,
            task = %build.task,
            priority = build.priority,
            "Build queued"
        );

        self.queue
            .push(QueueEntry::new(build_id.clone(), build.priority, sequence));
        self.counters.submitted += 1;
        let build = self.builds.entry(build_id).or_insert(build);
        Ok(&*build)
    }

    pub fn get(&self, build_id: &BuildId) -> Option<&Build> {
        self.builds.get(build_id)
    }

    /// Like [`get`](Self::get), but unknown ids are an error.
    pub fn require(&self, build_id: &BuildId) -> Result<&Build, CoreError> {
        self.builds
            .get(build_id)
            .ok_or_else(|| CoreError::UnknownBuild(build_id.to_string()))
    }

    /// Retained builds in submission order, optionally filtered by status.
    pub fn list(&self, status: Option<BuildStatus>, limit: usize) -> Vec<&Build> {
        let mut builds: Vec<&Build> = self
            .builds
            .values()
            .filter(|b| status.map_or(true, |s| b.status == s))
            .collect();
        builds.sort_by_key(|b| b.sequence);
        builds.truncate(limit);
        builds
    }

    /// Pop the next queued build, skipping entries that left the queued state.
    pub fn pop_queued(&mut self) -> Option<QueueEntry> {
        let builds = &self.builds;
        self.queue.pop_eligible(|entry| {
            builds
                .get(&entry.build_id)
                .is_some_and(|b| b.status == BuildStatus::Queued)
        })
    }

    /// Put a popped entry back with its original priority and sequence.
    pub fn push_back(&mut self, entry: QueueEntry) {
        self.queue.push(entry);
    }

    /// queued -> assigned
    pub fn assign(
        &mut self,
        build_id: &BuildId,
        worker_id: &WorkerId,
    ) -> Result<&Build, CoreError> {
        let build = self
            .builds
            .get_mut(build_id)
            .ok_or_else(|| CoreError::UnknownBuild(build_id.to_string()))?;

        if build.status != BuildStatus::Queued {
            return Err(CoreError::InvalidStateTransition {
                from: build.status,
                to: BuildStatus::Assigned,
            });
        }

        build.assign(worker_id.clone());
        info!(
            build_id = %build_id,
            worker_id = %worker_id,
            attempt = build.attempt,
            retry_count = build.retry_count,
            "Build assigned"
        );
        Ok(&*build)
    }

    /// assigned -> running, once the worker acknowledged the dispatch.
    ///
    /// Returns false if the build moved on in the meantime, including to a
    /// later attempt on the same worker.
    pub fn acknowledge(
        &mut self,
        build_id: &BuildId,
        worker_id: &WorkerId,
        attempt: u32,
    ) -> bool {
        match self.builds.get_mut(build_id) {
            Some(build) if awaits_dispatch(build, worker_id, attempt) => {
                build.start();
                info!(build_id = %build_id, worker_id = %worker_id, "Build running");
                true
            }
            _ => false,
        }
    }

    /// Record progress from the worker running the build.
    ///
    /// Progress from an assigned build counts as the acknowledgement.
    pub fn record_progress(
        &mut self,
        build_id: &BuildId,
        worker_id: &WorkerId,
        progress: f64,
    ) -> Result<bool, CoreError> {
        let build = self
            .builds
            .get_mut(build_id)
            .ok_or_else(|| CoreError::UnknownBuild(build_id.to_string()))?;

        if !holds(build, worker_id) {
            debug!(build_id = %build_id, worker_id = %worker_id, "Ignoring stale progress report");
            return Ok(false);
        }
        if build.status == BuildStatus::Assigned {
            build.start();
        }
        build.progress = progress.clamp(0.0, 1.0);
        Ok(true)
    }

    /// running -> completed | failed, from a worker's completion report.
    pub fn complete(
        &mut self,
        build_id: &BuildId,
        report: BuildReport,
    ) -> Result<ReportOutcome, CoreError> {
        let build = self
            .builds
            .get_mut(build_id)
            .ok_or_else(|| CoreError::UnknownBuild(build_id.to_string()))?;

        if !holds(build, &report.worker_id) {
            warn!(
                build_id = %build_id,
                worker_id = %report.worker_id,
                status = %build.status,
                "Ignoring report for a build the worker does not hold"
            );
            return Ok(ReportOutcome::Stale);
        }

        let (status, error) = if report.success {
            (BuildStatus::Completed, None)
        } else {
            let error = report
                .error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FAILURE.to_string());
            (BuildStatus::Failed, Some(error))
        };

        build.finish(
            status,
            BuildResult {
                success: report.success,
                artifacts: report.artifacts,
                error,
                duration_ms: report.duration_ms,
            },
        );
        info!(
            build_id = %build_id,
            worker_id = %report.worker_id,
            status = %status,
            duration_ms = report.duration_ms,
            "Build finished"
        );

        self.archive(build_id.clone(), status);
        Ok(ReportOutcome::Finished {
            status,
            worker_id: report.worker_id,
        })
    }

    /// assigned | running -> queued (or failed once retries run out).
    pub fn worker_lost(&mut self, build_id: &BuildId, worker_id: &WorkerId) -> LostOutcome {
        let Some(build) = self.builds.get_mut(build_id) else {
            return LostOutcome::NotHeld;
        };
        if !holds(build, worker_id) {
            return LostOutcome::NotHeld;
        }

        build.retry_count += 1;
        if build.retry_count > self.max_retries {
            build.retry_count = self.max_retries;
            build.finish(BuildStatus::Failed, BuildResult::failure(MAX_RETRIES_EXCEEDED));
            warn!(
                build_id = %build_id,
                worker_id = %worker_id,
                max_retries = self.max_retries,
                "Build failed: max retries exceeded"
            );
            self.archive(build_id.clone(), BuildStatus::Failed);
            return LostOutcome::Failed;
        }

        build.requeue();
        let retry_count = build.retry_count;
        let entry = QueueEntry::new(build_id.clone(), build.priority, build.sequence);
        self.queue.push(entry);
        self.counters.retried += 1;
        warn!(
            build_id = %build_id,
            worker_id = %worker_id,
            retry_count,
            "Worker lost, build requeued"
        );
        LostOutcome::Requeued { retry_count }
    }

    /// assigned -> queued after a failed dispatch. The retry count is untouched.
    ///
    /// Returns false if the build is no longer waiting on that dispatch.
    pub fn rollback_assignment(
        &mut self,
        build_id: &BuildId,
        worker_id: &WorkerId,
        attempt: u32,
    ) -> bool {
        match self.builds.get_mut(build_id) {
            Some(build) if awaits_dispatch(build, worker_id, attempt) => {
                build.requeue();
                let entry = QueueEntry::new(build_id.clone(), build.priority, build.sequence);
                self.queue.push(entry);
                true
            }
            _ => false,
        }
    }

    /// queued | assigned | running -> cancelled. Idempotent on terminal builds.
    pub fn cancel(&mut self, build_id: &BuildId) -> Result<CancelOutcome, CoreError> {
        let build = self
            .builds
            .get_mut(build_id)
            .ok_or_else(|| CoreError::UnknownBuild(build_id.to_string()))?;

        if build.is_terminal() {
            return Ok(CancelOutcome {
                status: build.status,
                released_worker: None,
                changed: false,
            });
        }

        let released_worker = build.worker_id.clone();
        build.finish(BuildStatus::Cancelled, BuildResult::failure(CANCELLED));
        info!(
            build_id = %build_id,
            worker_id = ?released_worker,
            "Build cancelled"
        );

        // Any queue entry is discarded lazily by pop_queued.
        self.archive(build_id.clone(), BuildStatus::Cancelled);
        Ok(CancelOutcome {
            status: BuildStatus::Cancelled,
            released_worker,
            changed: true,
        })
    }

    /// queued -> completed, satisfied by the artifact cache.
    pub fn complete_from_cache(&mut self, build_id: &BuildId, artifacts: Vec<String>) -> bool {
        match self.builds.get_mut(build_id) {
            Some(build) if build.status == BuildStatus::Queued => {
                build.finish(
                    BuildStatus::Completed,
                    BuildResult {
                        success: true,
                        artifacts,
                        error: None,
                        duration_ms: 0,
                    },
                );
                info!(build_id = %build_id, "Build satisfied from cache");
                self.counters.cache_hits += 1;
                self.archive(build_id.clone(), BuildStatus::Completed);
                true
            }
            _ => false,
        }
    }

    /// Track a terminal build and evict the oldest ones beyond the history limit.
    fn archive(&mut self, build_id: BuildId, status: BuildStatus) {
        match status {
            BuildStatus::Completed => self.counters.completed += 1,
            BuildStatus::Failed => self.counters.failed += 1,
            BuildStatus::Cancelled => self.counters.cancelled += 1,
            _ => {}
        }
        self.history.push_back(build_id);
        self.evict();
    }

    fn evict(&mut self) {
        while self.history.len() > self.history_limit {
            if let Some(oldest) = self.history.pop_front() {
                debug!(build_id = %oldest, "Evicting build from history");
                self.builds.remove(&oldest);
            }
        }
    }

    /// Number of builds waiting for a worker.
    pub fn queued_len(&self) -> usize {
        self.builds
            .values()
            .filter(|b| b.status == BuildStatus::Queued)
            .count()
    }

    pub fn counters(&self) -> BuildCounters {
        self.counters
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for build in self.builds.values() {
            match build.status {
                BuildStatus::Queued => counts.queued += 1,
                BuildStatus::Assigned => counts.assigned += 1,
                BuildStatus::Running => counts.running += 1,
                BuildStatus::Completed => counts.completed += 1,
                BuildStatus::Failed => counts.failed += 1,
                BuildStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.builds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builds.is_empty()
    }

    pub fn export(&self) -> BuildTableSnapshot {
        let mut builds: Vec<Build> = self.builds.values().cloned().collect();
        builds.sort_by_key(|b| b.sequence);
        BuildTableSnapshot {
            builds,
            history: self.history.iter().cloned().collect(),
            next_sequence: self.next_sequence,
            counters: self.counters,
        }
    }

    /// Rebuild the table from a snapshot.
    ///
    /// Builds that were assigned or running belonged to workers that did not
    /// survive the restart, so they go through the worker-lost transition
    /// right away. The outcomes are returned for logging.
    pub fn import(
        snapshot: BuildTableSnapshot,
        max_retries: u32,
        history_limit: usize,
    ) -> (Self, Vec<(BuildId, LostOutcome)>) {
        let mut table = Self::new(max_retries, history_limit);
        let max_sequence = snapshot.builds.iter().map(|b| b.sequence).max().unwrap_or(0);
        table.next_sequence = snapshot.next_sequence.max(max_sequence + 1);
        table.counters = snapshot.counters;

        for build in snapshot.builds {
            if build.status == BuildStatus::Queued {
                table
                    .queue
                    .push(QueueEntry::new(build.id.clone(), build.priority, build.sequence));
            }
            table.builds.insert(build.id.clone(), build);
        }
        table.history = snapshot
            .history
            .into_iter()
            .filter(|id| table.builds.get(id).is_some_and(Build::is_terminal))
            .collect();

        let mut orphaned: Vec<(BuildId, WorkerId, u64)> = table
            .builds
            .values()
            .filter(|b| b.status.holds_worker())
            .filter_map(|b| b.worker_id.clone().map(|w| (b.id.clone(), w, b.sequence)))
            .collect();
        orphaned.sort_by_key(|(_, _, sequence)| *sequence);

        let recovered = orphaned
            .into_iter()
            .map(|(build_id, worker_id, _)| {
                let outcome = table.worker_lost(&build_id, &worker_id);
                (build_id, outcome)
            })
            .collect();

        table.evict();
        (table, recovered)
    }
}

fn holds(build: &Build, worker_id: &WorkerId) -> bool {
    build.status.holds_worker() && build.worker_id.as_ref() == Some(worker_id)
}

fn awaits_dispatch(build: &Build, worker_id: &WorkerId, attempt: u32) -> bool {
    build.status == BuildStatus::Assigned && build.attempt == attempt && holds(build, worker_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> BuildTable {
        BuildTable::new(2, 100)
    }

    fn submit(table: &mut BuildTable, priority: i32) -> BuildId {
        table
            .submit(BuildRequest::new("app", "compile").with_priority(priority))
            .unwrap()
            .id
            .clone()
    }

    fn report(worker: &str, success: bool, error: Option<&str>) -> BuildReport {
        BuildReport {
            worker_id: WorkerId::new(worker),
            success,
            artifacts: vec!["target/app".to_string()],
            error: error.map(str::to_string),
            duration_ms: 1200,
        }
    }

    /// Pop + assign the way the scheduler does.
    fn start_on(table: &mut BuildTable, worker: &str) -> BuildId {
        let entry = table.pop_queued().unwrap();
        let worker = WorkerId::new(worker);
        let attempt = table.assign(&entry.build_id, &worker).unwrap().attempt;
        assert!(table.acknowledge(&entry.build_id, &worker, attempt));
        entry.build_id
    }

    #[test]
    fn test_submit_validates() {
        let mut table = table();
        let err = table.submit(BuildRequest::new("", "compile")).unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_submit_creates_queued_build() {
        let mut table = table();
        let id = submit(&mut table, 3);
        let build = table.get(&id).unwrap();
        assert_eq!(build.status, BuildStatus::Queued);
        assert_eq!(build.worker_id, None);
        assert_eq!(build.priority, 3);
        assert_eq!(table.queued_len(), 1);
    }

    #[test]
    fn test_pop_order_is_priority_then_submission() {
        let mut table = table();
        let low = submit(&mut table, 1);
        let high = submit(&mut table, 5);
        let low2 = submit(&mut table, 1);

        let order: Vec<BuildId> = std::iter::from_fn(|| table.pop_queued())
            .map(|e| e.build_id)
            .collect();
        assert_eq!(order, vec![high, low, low2]);
    }

    #[test]
    fn test_happy_path() {
        let mut table = table();
        submit(&mut table, 0);
        let id = start_on(&mut table, "w1");
        assert_eq!(table.get(&id).unwrap().status, BuildStatus::Running);

        let outcome = table.complete(&id, report("w1", true, None)).unwrap();
        assert_eq!(
            outcome,
            ReportOutcome::Finished {
                status: BuildStatus::Completed,
                worker_id: WorkerId::new("w1"),
            }
        );

        let build = table.get(&id).unwrap();
        assert_eq!(build.status, BuildStatus::Completed);
        assert_eq!(build.worker_id, None);
        assert_eq!(build.progress, 1.0);
        assert_eq!(build.result.as_ref().unwrap().artifacts, vec!["target/app"]);
        assert_eq!(table.counters().completed, 1);
    }

    #[test]
    fn test_failure_report_carries_message() {
        let mut table = table();
        submit(&mut table, 0);
        let id = start_on(&mut table, "w1");

        table.complete(&id, report("w1", false, Some(""))).unwrap();
        let build = table.get(&id).unwrap();
        assert_eq!(build.status, BuildStatus::Failed);
        assert_eq!(build.error(), Some("build failed"));
    }

    #[test]
    fn test_report_before_acknowledgement_is_applied() {
        let mut table = table();
        submit(&mut table, 0);
        let entry = table.pop_queued().unwrap();
        table.assign(&entry.build_id, &"w1".into()).unwrap();

        let outcome = table.complete(&entry.build_id, report("w1", true, None)).unwrap();
        assert!(matches!(outcome, ReportOutcome::Finished { .. }));
        // The late acknowledgement is a no-op.
        assert!(!table.acknowledge(&entry.build_id, &"w1".into(), 1));
    }

    #[test]
    fn test_report_from_wrong_worker_is_stale() {
        let mut table = table();
        submit(&mut table, 0);
        let id = start_on(&mut table, "w1");

        let outcome = table.complete(&id, report("w2", true, None)).unwrap();
        assert_eq!(outcome, ReportOutcome::Stale);
        assert_eq!(table.get(&id).unwrap().status, BuildStatus::Running);
    }

    #[test]
    fn test_assign_requires_queued() {
        let mut table = table();
        submit(&mut table, 0);
        let id = start_on(&mut table, "w1");

        let err = table.assign(&id, &"w2".into()).unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidStateTransition {
                from: BuildStatus::Running,
                to: BuildStatus::Assigned,
            }
        );
    }

    #[test]
    fn test_worker_lost_requeues_then_fails() {
        let mut table = table();
        submit(&mut table, 0);

        for attempt in 1..=2 {
            let id = start_on(&mut table, "w1");
            assert_eq!(
                table.worker_lost(&id, &"w1".into()),
                LostOutcome::Requeued { retry_count: attempt }
            );
            let build = table.get(&id).unwrap();
            assert_eq!(build.status, BuildStatus::Queued);
            assert_eq!(build.worker_id, None);
        }

        let id = start_on(&mut table, "w1");
        assert_eq!(table.worker_lost(&id, &"w1".into()), LostOutcome::Failed);

        let build = table.get(&id).unwrap();
        assert_eq!(build.status, BuildStatus::Failed);
        assert_eq!(build.error(), Some(MAX_RETRIES_EXCEEDED));
        assert_eq!(build.retry_count, 2);
        assert!(table.pop_queued().is_none());
    }

    #[test]
    fn test_worker_lost_ignores_builds_not_held() {
        let mut table = table();
        let id = submit(&mut table, 0);
        assert_eq!(table.worker_lost(&id, &"w1".into()), LostOutcome::NotHeld);
        assert_eq!(table.get(&id).unwrap().retry_count, 0);
    }

    #[test]
    fn test_requeued_build_keeps_precedence() {
        let mut table = table();
        let first = submit(&mut table, 0);
        let second = submit(&mut table, 0);

        let entry = table.pop_queued().unwrap();
        assert_eq!(entry.build_id, first);
        table.assign(&first, &"w1".into()).unwrap();
        table.worker_lost(&first, &"w1".into());

        assert_eq!(table.pop_queued().unwrap().build_id, first);
        assert_eq!(table.pop_queued().unwrap().build_id, second);
    }

    #[test]
    fn test_rollback_assignment() {
        let mut table = table();
        let id = submit(&mut table, 0);
        table.pop_queued().unwrap();
        table.assign(&id, &"w1".into()).unwrap();

        assert!(table.rollback_assignment(&id, &"w1".into(), 1));
        let build = table.get(&id).unwrap();
        assert_eq!(build.status, BuildStatus::Queued);
        assert_eq!(build.retry_count, 0);
        assert_eq!(table.pop_queued().unwrap().build_id, id);
    }

    #[test]
    fn test_dispatch_results_only_apply_to_their_attempt() {
        let mut table = table();
        let id = submit(&mut table, 0);
        let w1 = WorkerId::new("w1");

        table.pop_queued().unwrap();
        assert_eq!(table.assign(&id, &w1).unwrap().attempt, 1);
        table.worker_lost(&id, &w1);
        table.pop_queued().unwrap();
        assert_eq!(table.assign(&id, &w1).unwrap().attempt, 2);

        // Answers for the first attempt leave the second one alone.
        assert!(!table.rollback_assignment(&id, &w1, 1));
        assert!(!table.acknowledge(&id, &w1, 1));
        let build = table.get(&id).unwrap();
        assert_eq!(build.status, BuildStatus::Assigned);
        assert_eq!(build.worker_id, Some(w1.clone()));

        assert!(table.acknowledge(&id, &w1, 2));
        assert_eq!(table.get(&id).unwrap().status, BuildStatus::Running);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut table = table();
        let id = submit(&mut table, 0);

        let first = table.cancel(&id).unwrap();
        let second = table.cancel(&id).unwrap();
        assert_eq!(first.status, BuildStatus::Cancelled);
        assert_eq!(second.status, BuildStatus::Cancelled);
        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(table.get(&id).unwrap().error(), Some(CANCELLED));
        assert!(table.pop_queued().is_none());
    }

    #[test]
    fn test_cancel_running_releases_worker() {
        let mut table = table();
        submit(&mut table, 0);
        let id = start_on(&mut table, "w1");

        let outcome = table.cancel(&id).unwrap();
        assert_eq!(outcome.released_worker, Some(WorkerId::new("w1")));

        // A late report is ignored.
        let late = table.complete(&id, report("w1", true, None)).unwrap();
        assert_eq!(late, ReportOutcome::Stale);
        assert_eq!(table.get(&id).unwrap().status, BuildStatus::Cancelled);
    }

    #[test]
    fn test_cancel_terminal_returns_existing_status() {
        let mut table = table();
        submit(&mut table, 0);
        let id = start_on(&mut table, "w1");
        table.complete(&id, report("w1", true, None)).unwrap();

        let outcome = table.cancel(&id).unwrap();
        assert_eq!(outcome.status, BuildStatus::Completed);
        assert!(!outcome.changed);
    }

    #[test]
    fn test_cancel_unknown_build() {
        let mut table = table();
        let err = table.cancel(&BuildId::new("nope")).unwrap_err();
        assert!(matches!(err, CoreError::UnknownBuild(_)));
    }

    #[test]
    fn test_progress_from_assigned_starts_build() {
        let mut table = table();
        let id = submit(&mut table, 0);
        table.pop_queued().unwrap();
        table.assign(&id, &"w1".into()).unwrap();

        assert!(table.record_progress(&id, &"w1".into(), 1.7).unwrap());
        let build = table.get(&id).unwrap();
        assert_eq!(build.status, BuildStatus::Running);
        assert_eq!(build.progress, 1.0);

        assert!(!table.record_progress(&id, &"w2".into(), 0.5).unwrap());
    }

    #[test]
    fn test_cache_hit_only_applies_to_queued_builds() {
        let mut table = table();
        let id = submit(&mut table, 0);
        assert!(table.complete_from_cache(&id, vec!["cached.tar".to_string()]));
        assert!(!table.complete_from_cache(&id, Vec::new()));

        let build = table.get(&id).unwrap();
        assert_eq!(build.status, BuildStatus::Completed);
        assert!(table.pop_queued().is_none());
        assert_eq!(table.counters().cache_hits, 1);
    }

    #[test]
    fn test_history_evicts_oldest_terminal_builds() {
        let mut table = BuildTable::new(0, 2);
        let ids: Vec<BuildId> = (0..3).map(|_| submit(&mut table, 0)).collect();
        let live = submit(&mut table, 0);
        for id in &ids {
            table.cancel(id).unwrap();
        }

        assert!(table.get(&ids[0]).is_none());
        assert!(table.get(&ids[1]).is_some());
        assert!(table.get(&ids[2]).is_some());
        assert!(table.get(&live).is_some());
        assert_eq!(table.counters().cancelled, 3);
    }

    #[test]
    fn test_import_requeues_in_flight_builds() {
        let mut table = table();
        submit(&mut table, 0);
        let running = start_on(&mut table, "w1");
        let waiting = submit(&mut table, 0);

        let (restored, recovered) = BuildTable::import(table.export(), 2, 100);
        assert_eq!(
            recovered,
            vec![(running.clone(), LostOutcome::Requeued { retry_count: 1 })]
        );

        let build = restored.get(&running).unwrap();
        assert_eq!(build.status, BuildStatus::Queued);
        assert_eq!(build.worker_id, None);
        assert_eq!(restored.get(&waiting).unwrap().status, BuildStatus::Queued);
        assert_eq!(restored.queued_len(), 2);
        assert_eq!(restored.len(), table.len());
    }

    #[test]
    fn test_import_continues_sequence() {
        let mut table = table();
        submit(&mut table, 0);
        let (mut restored, _) = BuildTable::import(table.export(), 2, 100);
        let next = submit(&mut restored, 0);
        assert_eq!(restored.get(&next).unwrap().sequence, 2);
    }
}
