//! Worker registry - known workers, their load and liveness.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use buildfleet_core::{BuildId, CoreError, ResourceUsage, WorkerId, WorkerInfo, WorkerStatus};

/// A registered worker's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Worker information from registration.
    pub info: WorkerInfo,

    /// Current status.
    pub status: WorkerStatus,

    /// Builds currently held by this worker.
    #[serde(default)]
    pub active_builds: BTreeSet<BuildId>,

    /// Timestamp of last heartbeat (or registration).
    pub last_heartbeat: DateTime<Utc>,

    /// When the worker first registered.
    pub registered_at: DateTime<Utc>,

    /// Resource usage from the last heartbeat.
    #[serde(default)]
    pub resources: ResourceUsage,
}

impl WorkerRecord {
    fn new(info: WorkerInfo, now: DateTime<Utc>) -> Self {
        Self {
            info,
            status: WorkerStatus::Available,
            active_builds: BTreeSet::new(),
            last_heartbeat: now,
            registered_at: now,
            resources: ResourceUsage::default(),
        }
    }

    /// Worker identifier.
    pub fn id(&self) -> &WorkerId {
        &self.info.worker_id
    }

    /// Number of builds currently held.
    pub fn active_count(&self) -> u32 {
        self.active_builds.len() as u32
    }

    /// Declared capacity.
    pub fn capacity(&self) -> u32 {
        self.info.capacity
    }

    /// True if the worker is online and below capacity.
    pub fn has_free_slot(&self) -> bool {
        self.status != WorkerStatus::Offline && self.active_count() < self.capacity()
    }

    fn refresh_status(&mut self) {
        if self.status == WorkerStatus::Offline {
            return;
        }
        self.status = if self.active_count() >= self.capacity() {
            WorkerStatus::Busy
        } else {
            WorkerStatus::Available
        };
    }

    /// Orders by load ratio, then freshest heartbeat, then id.
    fn selection_order(&self, other: &Self) -> Ordering {
        let lhs = u64::from(self.active_count()) * u64::from(other.capacity());
        let rhs = u64::from(other.active_count()) * u64::from(self.capacity());
        lhs.cmp(&rhs)
            .then_with(|| other.last_heartbeat.cmp(&self.last_heartbeat))
            .then_with(|| self.id().cmp(other.id()))
    }
}

/// Worker counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerCounts {
    pub total: usize,
    pub available: usize,
    pub busy: usize,
    pub offline: usize,
    pub capacity: u64,
    pub active_builds: u64,
}

/// Registry of all workers seen since startup (or restored from a snapshot).
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: HashMap<WorkerId, WorkerRecord>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new worker. Identifiers must be unique.
    pub fn register(
        &mut self,
        info: WorkerInfo,
        now: DateTime<Utc>,
    ) -> Result<&WorkerRecord, CoreError> {
        info.validate()?;
        if self.workers.contains_key(&info.worker_id) {
            return Err(CoreError::DuplicateWorker(info.worker_id.into_inner()));
        }

        let worker_id = info.worker_id.clone();
        info!(
            worker_id = %worker_id,
            address = %info.address,
            capacity = info.capacity,
            capabilities = ?info.capabilities,
            "Worker registered"
        );

        let record = self
            .workers
            .entry(worker_id)
            .or_insert_with(|| WorkerRecord::new(info, now));
        Ok(&*record)
    }

    /// Record a heartbeat. Returns true if the worker was offline and is now revived.
    pub fn heartbeat(
        &mut self,
        worker_id: &WorkerId,
        resources: ResourceUsage,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let worker = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| CoreError::UnknownWorker(worker_id.to_string()))?;

        worker.last_heartbeat = now;
        worker.resources = resources;

        let revived = worker.status == WorkerStatus::Offline;
        if revived {
            worker.status = WorkerStatus::Available;
            worker.refresh_status();
            info!(worker_id = %worker_id, "Worker back online");
        } else {
            debug!(
                worker_id = %worker_id,
                active = worker.active_count(),
                cpu = resources.cpu_usage,
                memory = resources.memory_usage,
                "Heartbeat received"
            );
        }

        Ok(revived)
    }

    /// Pick the least loaded online worker that can run `task`.
    ///
    /// `None` is not an error: the caller should try again later.
    pub fn select_worker(&self, task: &str) -> Option<WorkerId> {
        self.workers
            .values()
            .filter(|w| w.has_free_slot() && w.info.supports_task(task))
            .min_by(|a, b| a.selection_order(b))
            .map(|w| w.id().clone())
    }

    /// Reserve a slot on the worker for `build_id`.
    pub fn mark_busy(&mut self, worker_id: &WorkerId, build_id: &BuildId) -> Result<(), CoreError> {
        let worker = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| CoreError::UnknownWorker(worker_id.to_string()))?;

        if worker.status == WorkerStatus::Offline || worker.active_count() >= worker.capacity() {
            return Err(CoreError::CapacityExceeded {
                worker: worker_id.clone(),
                capacity: worker.capacity(),
            });
        }

        worker.active_builds.insert(build_id.clone());
        worker.refresh_status();
        Ok(())
    }

    /// Release the slot held for `build_id`. Releasing twice is a no-op.
    pub fn mark_available(
        &mut self,
        worker_id: &WorkerId,
        build_id: &BuildId,
    ) -> Result<(), CoreError> {
        let worker = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| CoreError::UnknownWorker(worker_id.to_string()))?;

        if !worker.active_builds.remove(build_id) {
            debug!(worker_id = %worker_id, build_id = %build_id, "Slot already released");
        }
        worker.refresh_status();
        Ok(())
    }

    /// Mark the worker offline and hand back the builds it held.
    ///
    /// Idempotent: a worker that is already offline holds nothing.
    pub fn mark_offline(&mut self, worker_id: &WorkerId) -> Result<Vec<BuildId>, CoreError> {
        let worker = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| CoreError::UnknownWorker(worker_id.to_string()))?;

        if worker.status != WorkerStatus::Offline {
            warn!(
                worker_id = %worker_id,
                held = worker.active_count(),
                last_heartbeat = %worker.last_heartbeat,
                "Marking worker offline"
            );
        }
        worker.status = WorkerStatus::Offline;
        Ok(std::mem::take(&mut worker.active_builds).into_iter().collect())
    }

    /// Online workers whose last heartbeat is older than `timeout`.
    pub fn stale_workers(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<WorkerId> {
        let mut stale: Vec<WorkerId> = self
            .workers
            .values()
            .filter(|w| w.status != WorkerStatus::Offline && now - w.last_heartbeat > timeout)
            .map(|w| w.id().clone())
            .collect();
        stale.sort();
        stale
    }

    /// True if any online worker has a free slot.
    pub fn has_free_slot(&self) -> bool {
        self.workers.values().any(WorkerRecord::has_free_slot)
    }

    pub fn get(&self, worker_id: &WorkerId) -> Option<&WorkerRecord> {
        self.workers.get(worker_id)
    }

    /// All workers ordered by id.
    pub fn list(&self) -> Vec<&WorkerRecord> {
        let mut workers: Vec<&WorkerRecord> = self.workers.values().collect();
        workers.sort_by(|a, b| a.id().cmp(b.id()));
        workers
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn counts(&self) -> WorkerCounts {
        let mut counts = WorkerCounts::default();
        for worker in self.workers.values() {
            counts.total += 1;
            match worker.status {
                WorkerStatus::Available => counts.available += 1,
                WorkerStatus::Busy => counts.busy += 1,
                WorkerStatus::Offline => counts.offline += 1,
            }
            if worker.status != WorkerStatus::Offline {
                counts.capacity += u64::from(worker.capacity());
            }
            counts.active_builds += u64::from(worker.active_count());
        }
        counts
    }

    /// Records for a state snapshot.
    pub fn export(&self) -> Vec<WorkerRecord> {
        self.list().into_iter().cloned().collect()
    }

    /// Rebuild the registry from snapshot records.
    ///
    /// No worker process is assumed to survive a coordinator restart, so every
    /// worker comes back offline and empty until it heartbeats again.
    pub fn import(records: Vec<WorkerRecord>) -> Self {
        let workers = records
            .into_iter()
            .map(|mut record| {
                record.status = WorkerStatus::Offline;
                record.active_builds.clear();
                (record.id().clone(), record)
            })
            .collect();
        Self { workers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn registry_with(workers: &[(&str, u32)]) -> WorkerRegistry {
        let mut registry = WorkerRegistry::new();
        for (id, capacity) in workers {
            registry
                .register(WorkerInfo::new(*id, format!("http://{id}:9000"), *capacity), t0())
                .unwrap();
        }
        registry
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = registry_with(&[("w1", 1)]);
        let err = registry
            .register(WorkerInfo::new("w1", "http://elsewhere:9000", 4), t0())
            .unwrap_err();
        assert_eq!(err, CoreError::DuplicateWorker("w1".to_string()));
        assert_eq!(registry.get(&"w1".into()).unwrap().capacity(), 1);
    }

    #[test]
    fn test_register_initial_state() {
        let registry = registry_with(&[("w1", 2)]);
        let worker = registry.get(&"w1".into()).unwrap();
        assert_eq!(worker.status, WorkerStatus::Available);
        assert_eq!(worker.active_count(), 0);
        assert_eq!(worker.last_heartbeat, t0());
    }

    #[test]
    fn test_heartbeat_unknown_worker() {
        let mut registry = WorkerRegistry::new();
        let err = registry
            .heartbeat(&"ghost".into(), ResourceUsage::default(), t0())
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownWorker(_)));
    }

    #[test]
    fn test_select_prefers_lowest_load_ratio() {
        let mut registry = registry_with(&[("small", 2), ("large", 8)]);
        registry.mark_busy(&"small".into(), &"b1".into()).unwrap();
        registry.mark_busy(&"large".into(), &"b2".into()).unwrap();
        registry.mark_busy(&"large".into(), &"b3".into()).unwrap();

        // small: 1/2, large: 2/8
        assert_eq!(registry.select_worker("compile"), Some("large".into()));
    }

    #[test]
    fn test_select_tie_breaks_on_freshest_heartbeat() {
        let mut registry = registry_with(&[("a", 1), ("b", 1)]);
        registry
            .heartbeat(&"a".into(), ResourceUsage::default(), t0() + Duration::seconds(5))
            .unwrap();
        registry
            .heartbeat(&"b".into(), ResourceUsage::default(), t0() + Duration::seconds(9))
            .unwrap();
        assert_eq!(registry.select_worker("compile"), Some("b".into()));
    }

    #[test]
    fn test_select_respects_capabilities() {
        let mut registry = WorkerRegistry::new();
        registry
            .register(
                WorkerInfo::new("linux", "http://linux:9000", 1).with_capability("cargo-build"),
                t0(),
            )
            .unwrap();
        assert_eq!(registry.select_worker("xcodebuild"), None);
        assert_eq!(registry.select_worker("cargo-build"), Some("linux".into()));
    }

    #[test]
    fn test_mark_busy_enforces_capacity() {
        let mut registry = registry_with(&[("w1", 1)]);
        registry.mark_busy(&"w1".into(), &"b1".into()).unwrap();
        assert_eq!(registry.get(&"w1".into()).unwrap().status, WorkerStatus::Busy);
        assert_eq!(registry.select_worker("compile"), None);

        let err = registry.mark_busy(&"w1".into(), &"b2".into()).unwrap_err();
        assert!(matches!(err, CoreError::CapacityExceeded { capacity: 1, .. }));
        assert_eq!(registry.get(&"w1".into()).unwrap().active_count(), 1);
    }

    #[test]
    fn test_mark_available_is_idempotent() {
        let mut registry = registry_with(&[("w1", 1)]);
        registry.mark_busy(&"w1".into(), &"b1".into()).unwrap();
        registry.mark_available(&"w1".into(), &"b1".into()).unwrap();
        registry.mark_available(&"w1".into(), &"b1".into()).unwrap();

        let worker = registry.get(&"w1".into()).unwrap();
        assert_eq!(worker.active_count(), 0);
        assert_eq!(worker.status, WorkerStatus::Available);
    }

    #[test]
    fn test_mark_offline_returns_held_builds_once() {
        let mut registry = registry_with(&[("w1", 3)]);
        registry.mark_busy(&"w1".into(), &"b1".into()).unwrap();
        registry.mark_busy(&"w1".into(), &"b2".into()).unwrap();

        let held = registry.mark_offline(&"w1".into()).unwrap();
        assert_eq!(held, vec![BuildId::new("b1"), BuildId::new("b2")]);
        assert!(registry.mark_offline(&"w1".into()).unwrap().is_empty());
        assert_eq!(registry.select_worker("compile"), None);
    }

    #[test]
    fn test_heartbeat_revives_offline_worker() {
        let mut registry = registry_with(&[("w1", 1)]);
        registry.mark_busy(&"w1".into(), &"b1".into()).unwrap();
        registry.mark_offline(&"w1".into()).unwrap();

        let revived = registry
            .heartbeat(&"w1".into(), ResourceUsage::default(), t0())
            .unwrap();
        assert!(revived);

        let worker = registry.get(&"w1".into()).unwrap();
        assert_eq!(worker.status, WorkerStatus::Available);
        assert!(worker.active_builds.is_empty());
    }

    #[test]
    fn test_stale_workers() {
        let mut registry = registry_with(&[("fresh", 1), ("silent", 1)]);
        let now = t0() + Duration::seconds(60);
        registry
            .heartbeat(&"fresh".into(), ResourceUsage::default(), now)
            .unwrap();

        let stale = registry.stale_workers(now, Duration::seconds(45));
        assert_eq!(stale, vec![WorkerId::new("silent")]);

        registry.mark_offline(&"silent".into()).unwrap();
        assert!(registry.stale_workers(now, Duration::seconds(45)).is_empty());
    }

    #[test]
    fn test_import_marks_everyone_offline() {
        let mut registry = registry_with(&[("w1", 2)]);
        registry.mark_busy(&"w1".into(), &"b1".into()).unwrap();

        let restored = WorkerRegistry::import(registry.export());
        let worker = restored.get(&"w1".into()).unwrap();
        assert_eq!(worker.status, WorkerStatus::Offline);
        assert!(worker.active_builds.is_empty());
        assert_eq!(worker.info, registry.get(&"w1".into()).unwrap().info);
    }

    #[test]
    fn test_counts() {
        let mut registry = registry_with(&[("a", 1), ("b", 2), ("c", 1)]);
        registry.mark_busy(&"a".into(), &"b1".into()).unwrap();
        registry.mark_offline(&"c".into()).unwrap();

        let counts = registry.counts();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.busy, 1);
        assert_eq!(counts.available, 1);
        assert_eq!(counts.offline, 1);
        assert_eq!(counts.capacity, 3);
        assert_eq!(counts.active_builds, 1);
    }
}
