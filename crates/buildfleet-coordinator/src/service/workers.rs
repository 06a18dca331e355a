//! Worker registration and heartbeats.

use std::sync::Arc;

use chrono::Utc;

use buildfleet_core::{CoordinatorEvent, CoreError, ResourceUsage, WorkerId, WorkerInfo};

use crate::registry::WorkerRecord;
use crate::state::AppState;

/// Worker-facing operations.
#[derive(Clone)]
pub struct WorkerService {
    state: Arc<AppState>,
}

impl WorkerService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Add a worker to the pool. Its slots become schedulable immediately.
    pub async fn register(&self, info: WorkerInfo) -> Result<WorkerRecord, CoreError> {
        let record = {
            let mut workers = self.state.workers.write().await;
            workers.register(info, Utc::now())?.clone()
        };

        self.state.publish(CoordinatorEvent::worker_status(
            record.id().clone(),
            record.status,
        ));
        self.state.request_save();
        self.state.wake_scheduler();
        Ok(record)
    }

    /// Refresh a worker's liveness. An offline worker comes back with no builds.
    pub async fn heartbeat(
        &self,
        worker_id: &WorkerId,
        resources: ResourceUsage,
    ) -> Result<(), CoreError> {
        let revived = {
            let mut workers = self.state.workers.write().await;
            let revived = workers.heartbeat(worker_id, resources, Utc::now())?;
            revived.then(|| workers.get(worker_id).map(|w| w.status)).flatten()
        };

        if let Some(status) = revived {
            self.state
                .publish(CoordinatorEvent::worker_status(worker_id.clone(), status));
            self.state.request_save();
            self.state.wake_scheduler();
        }
        Ok(())
    }

    pub async fn list(&self) -> Vec<WorkerRecord> {
        let workers = self.state.workers.read().await;
        workers.list().into_iter().cloned().collect()
    }
}
