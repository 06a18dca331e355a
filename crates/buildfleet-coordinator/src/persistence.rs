//! Snapshot persistence.
//!
//! The coordinator writes its whole state (builds, history, counters and the
//! worker registry) as a single JSON document. Writes go to a temporary file
//! that is synced and then renamed over the previous snapshot, so a crash
//! leaves either the old or the new snapshot on disk, never a torn one.
//!
//! On restore every worker comes back offline with no slots held: a worker
//! that is still alive revives with its next heartbeat. Builds that were
//! assigned or running go through the worker-lost transition.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use buildfleet_core::BuildId;

use crate::config::Config;
use crate::lifecycle::{BuildTable, BuildTableSnapshot, LostOutcome};
use crate::registry::{WorkerRecord, WorkerRegistry};
use crate::state::AppState;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Snapshot version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
}

/// On-disk coordinator state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub builds: BuildTableSnapshot,
    #[serde(default)]
    pub workers: Vec<WorkerRecord>,
}

impl Snapshot {
    /// Capture the current state. Takes read locks in the usual order.
    pub async fn capture(state: &AppState) -> Self {
        let builds = state.builds.read().await;
        let workers = state.workers.read().await;
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            builds: builds.export(),
            workers: workers.export(),
        }
    }

    /// Rebuild the in-memory tables.
    ///
    /// Returns the builds that were recovered from workers that did not
    /// survive the restart.
    pub fn restore(
        self,
        config: &Config,
    ) -> (BuildTable, WorkerRegistry, Vec<(BuildId, LostOutcome)>) {
        let (builds, recovered) =
            BuildTable::import(self.builds, config.max_retries, config.retained_history());
        let workers = WorkerRegistry::import(self.workers);
        (builds, workers, recovered)
    }
}

/// Reads and writes the snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Atomically replace the snapshot file.
    pub async fn save(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_path = self.temp_path();
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        // Atomic replace (rename is atomic on POSIX)
        tokio::fs::rename(&temp_path, &self.path).await?;

        debug!(
            path = %self.path.display(),
            bytes = bytes.len(),
            builds = snapshot.builds.builds.len(),
            workers = snapshot.workers.len(),
            "Snapshot written"
        );
        Ok(())
    }

    /// Read the snapshot. A missing file means a fresh start.
    pub async fn load(&self) -> Result<Option<Snapshot>, PersistenceError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found: snapshot.version,
                supported: SNAPSHOT_VERSION,
            });
        }
        Ok(Some(snapshot))
    }
}

/// Writes snapshots on request and on a timer.
pub struct Snapshotter {
    state: Arc<AppState>,
    store: SnapshotStore,
}

impl Snapshotter {
    pub fn new(state: Arc<AppState>, store: SnapshotStore) -> Self {
        Self { state, store }
    }

    /// Capture and write one snapshot.
    pub async fn save_now(&self) -> Result<(), PersistenceError> {
        let snapshot = Snapshot::capture(&self.state).await;
        self.store.save(&snapshot).await
    }

    /// Save on every request (coalesced) and every interval. Writes a final
    /// snapshot when the token is cancelled.
    pub async fn run(self, token: CancellationToken) {
        let interval = self.state.config.snapshot_interval();
        info!(
            path = %self.store.path().display(),
            interval_secs = interval.as_secs(),
            "Snapshotter started"
        );

        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.state.save_requested() => {}
            }
            if let Err(e) = self.save_now().await {
                warn!(error = %e, "Failed to write snapshot");
            }
        }

        match self.save_now().await {
            Ok(()) => info!(path = %self.store.path().display(), "Final snapshot written"),
            Err(e) => error!(error = %e, "Failed to write final snapshot"),
        }
    }
}
