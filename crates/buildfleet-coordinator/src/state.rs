//! Shared application state.

use std::sync::Arc;

use tokio::sync::{broadcast, Notify, RwLock, RwLockWriteGuard};

use buildfleet_core::CoordinatorEvent;

use crate::cache::CacheClient;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::lifecycle::BuildTable;
use crate::registry::WorkerRegistry;

/// Capacity of the event channel feeding the monitor forwarder.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Shared application state.
///
/// Lock order is always `builds` before `workers`. Code that needs both
/// takes them through [`AppState::lock_all`].
pub struct AppState {
    /// Coordinator configuration.
    pub config: Config,

    /// Build records, queue and history.
    pub builds: RwLock<BuildTable>,

    /// Registered workers.
    pub workers: RwLock<WorkerRegistry>,

    /// Transport to worker execution endpoints.
    pub dispatcher: Arc<dyn Dispatcher>,

    /// Artifact cache, if configured.
    pub cache: Option<Arc<dyn CacheClient>>,

    events: broadcast::Sender<CoordinatorEvent>,
    scheduler_wakeup: Notify,
    save_requested: Notify,
}

impl AppState {
    /// Create a new AppState with empty tables.
    pub fn new(config: Config, dispatcher: Arc<dyn Dispatcher>) -> Arc<Self> {
        let builds = BuildTable::new(config.max_retries, config.retained_history());
        Self::from_parts(config, builds, WorkerRegistry::new(), dispatcher, None)
    }

    /// Create a new AppState from restored tables and collaborators.
    pub fn from_parts(
        config: Config,
        builds: BuildTable,
        workers: WorkerRegistry,
        dispatcher: Arc<dyn Dispatcher>,
        cache: Option<Arc<dyn CacheClient>>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            config,
            builds: RwLock::new(builds),
            workers: RwLock::new(workers),
            dispatcher,
            cache,
            events,
            scheduler_wakeup: Notify::new(),
            save_requested: Notify::new(),
        })
    }

    /// Write-lock builds, then workers.
    pub async fn lock_all(
        &self,
    ) -> (
        RwLockWriteGuard<'_, BuildTable>,
        RwLockWriteGuard<'_, WorkerRegistry>,
    ) {
        let builds = self.builds.write().await;
        let workers = self.workers.write().await;
        (builds, workers)
    }

    /// Publish an event. Nobody listening is fine.
    pub fn publish(&self, event: CoordinatorEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    /// Tell the scheduler that a build was queued or a slot was freed.
    pub fn wake_scheduler(&self) {
        self.scheduler_wakeup.notify_one();
    }

    pub async fn scheduler_woken(&self) {
        self.scheduler_wakeup.notified().await;
    }

    /// Ask the snapshotter to persist state soon. Requests coalesce.
    pub fn request_save(&self) {
        self.save_requested.notify_one();
    }

    pub async fn save_requested(&self) {
        self.save_requested.notified().await;
    }
}
