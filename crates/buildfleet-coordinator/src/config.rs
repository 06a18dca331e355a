//! Coordinator configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server bind address.
    pub bind_addr: String,

    /// Snapshot file. Persistence is disabled when unset.
    pub state_path: Option<PathBuf>,

    /// Base URL of the artifact cache server.
    pub cache_url: Option<String>,

    /// Base URL of the monitor that receives coordinator events.
    pub monitor_url: Option<String>,

    /// How many times a build may lose its worker before it fails.
    pub max_retries: u32,

    /// Heartbeat timeout before considering a worker dead (seconds).
    pub heartbeat_timeout_secs: u64,

    /// How often the liveness monitor scans heartbeats (seconds).
    pub liveness_interval_secs: u64,

    /// Periodic snapshot interval (seconds).
    pub snapshot_interval_secs: u64,

    /// Terminal builds kept for status queries before eviction. At least the
    /// most recent one is always kept.
    pub history_limit: usize,

    /// Execution timeout passed to workers in each task descriptor (seconds).
    pub build_timeout_secs: u64,

    /// Delay before retrying builds that found no eligible worker (milliseconds).
    pub schedule_retry_ms: u64,

    /// Timeout for calls to worker execution endpoints (seconds).
    pub dispatch_timeout_secs: u64,
}

impl Config {
    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        i64::try_from(self.heartbeat_timeout_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Terminal builds retained, never fewer than one.
    pub fn retained_history(&self) -> usize {
        self.history_limit.max(1)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs.max(1))
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs.max(1))
    }

    pub fn schedule_retry(&self) -> Duration {
        Duration::from_millis(self.schedule_retry_ms.max(1))
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            state_path: None,
            cache_url: None,
            monitor_url: None,
            max_retries: 3,
            heartbeat_timeout_secs: 45,
            liveness_interval_secs: 5,
            snapshot_interval_secs: 30,
            history_limit: 1000,
            build_timeout_secs: 3600,
            schedule_retry_ms: 500,
            dispatch_timeout_secs: 10,
        }
    }
}
