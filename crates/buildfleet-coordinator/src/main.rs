//! BuildFleet Coordinator Server

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use buildfleet_coordinator::cache::{CacheClient, HttpCacheClient};
use buildfleet_coordinator::dispatch::{Dispatcher, HttpDispatcher};
use buildfleet_coordinator::monitor::{forward_events, HttpEventSink};
use buildfleet_coordinator::shutdown::install_shutdown_handler;
use buildfleet_coordinator::{
    http, AppState, BuildTable, Config, LivenessMonitor, Scheduler, SnapshotStore, Snapshotter,
    WorkerRegistry,
};

/// Timeout for fire-and-forget monitor deliveries.
const MONITOR_TIMEOUT: Duration = Duration::from_secs(5);

/// BuildFleet coordinator - schedules builds onto a pool of workers
#[derive(Parser, Debug)]
#[command(name = "buildfleet-coordinator")]
#[command(version, about, long_about = None)]
struct Cli {
    /// HTTP bind address
    #[arg(long, env = "BUILDFLEET_BIND")]
    bind: Option<String>,

    /// Snapshot file (persistence is disabled when unset)
    #[arg(long, env = "BUILDFLEET_STATE_PATH")]
    state_path: Option<PathBuf>,

    /// Artifact cache base URL
    #[arg(long, env = "BUILDFLEET_CACHE_URL")]
    cache_url: Option<String>,

    /// Monitor base URL that receives coordinator events
    #[arg(long, env = "BUILDFLEET_MONITOR_URL")]
    monitor_url: Option<String>,

    /// Worker losses a build survives before it fails
    #[arg(long, env = "BUILDFLEET_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Seconds without a heartbeat before a worker is marked offline
    #[arg(long, env = "BUILDFLEET_HEARTBEAT_TIMEOUT_SECS")]
    heartbeat_timeout_secs: Option<u64>,

    /// Seconds between liveness scans
    #[arg(long, env = "BUILDFLEET_LIVENESS_INTERVAL_SECS")]
    liveness_interval_secs: Option<u64>,

    /// Seconds between periodic snapshots
    #[arg(long, env = "BUILDFLEET_SNAPSHOT_INTERVAL_SECS")]
    snapshot_interval_secs: Option<u64>,

    /// Finished builds kept for status queries
    #[arg(long, env = "BUILDFLEET_HISTORY_LIMIT")]
    history_limit: Option<usize>,

    /// Execution timeout handed to workers, in seconds
    #[arg(long, env = "BUILDFLEET_BUILD_TIMEOUT_SECS")]
    build_timeout_secs: Option<u64>,

    /// Retry delay for builds no worker can take yet, in milliseconds
    #[arg(long, env = "BUILDFLEET_SCHEDULE_RETRY_MS")]
    schedule_retry_ms: Option<u64>,

    /// Timeout for worker dispatch and cache calls, in seconds
    #[arg(long, env = "BUILDFLEET_DISPATCH_TIMEOUT_SECS")]
    dispatch_timeout_secs: Option<u64>,
}

impl Cli {
    /// Apply command-line overrides on top of the defaults.
    fn into_config(self) -> Config {
        let defaults = Config::default();
        Config {
            bind_addr: self.bind.unwrap_or(defaults.bind_addr),
            state_path: self.state_path.or(defaults.state_path),
            cache_url: self.cache_url.or(defaults.cache_url),
            monitor_url: self.monitor_url.or(defaults.monitor_url),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            heartbeat_timeout_secs: self
                .heartbeat_timeout_secs
                .unwrap_or(defaults.heartbeat_timeout_secs),
            liveness_interval_secs: self
                .liveness_interval_secs
                .unwrap_or(defaults.liveness_interval_secs),
            snapshot_interval_secs: self
                .snapshot_interval_secs
                .unwrap_or(defaults.snapshot_interval_secs),
            history_limit: self.history_limit.unwrap_or(defaults.history_limit),
            build_timeout_secs: self
                .build_timeout_secs
                .unwrap_or(defaults.build_timeout_secs),
            schedule_retry_ms: self.schedule_retry_ms.unwrap_or(defaults.schedule_retry_ms),
            dispatch_timeout_secs: self
                .dispatch_timeout_secs
                .unwrap_or(defaults.dispatch_timeout_secs),
        }
    }
}

/// Load the snapshot if there is one, otherwise start empty.
async fn restore_state(
    config: &Config,
    store: Option<&SnapshotStore>,
) -> Result<(BuildTable, WorkerRegistry), Box<dyn std::error::Error>> {
    let snapshot = match store {
        Some(store) => store.load().await?,
        None => None,
    };

    let Some(snapshot) = snapshot else {
        info!("Starting with empty state");
        return Ok((
            BuildTable::new(config.max_retries, config.retained_history()),
            WorkerRegistry::new(),
        ));
    };

    let saved_at = snapshot.saved_at;
    let (builds, workers, recovered) = snapshot.restore(config);
    for (build_id, outcome) in &recovered {
        warn!(build_id = %build_id, outcome = ?outcome, "Recovered in-flight build");
    }
    info!(
        saved_at = %saved_at,
        builds = builds.len(),
        queued = builds.queued_len(),
        workers = workers.len(),
        recovered = recovered.len(),
        "State restored from snapshot"
    );
    Ok((builds, workers))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config = Cli::parse().into_config();
    let http_addr: SocketAddr = config.bind_addr.parse()?;

    let store = config.state_path.clone().map(SnapshotStore::new);
    if store.is_none() {
        warn!("No state path configured - persistence disabled");
    }
    let (builds, workers) = restore_state(&config, store.as_ref()).await?;

    // Collaborator clients
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(HttpDispatcher::new(config.dispatch_timeout())?);
    let cache: Option<Arc<dyn CacheClient>> = match &config.cache_url {
        Some(url) => {
            info!(cache_url = %url, "Artifact cache enabled");
            Some(Arc::new(HttpCacheClient::new(url, config.dispatch_timeout())?))
        }
        None => None,
    };
    let monitor = match &config.monitor_url {
        Some(url) => {
            info!(monitor_url = %url, "Monitor forwarding enabled");
            Some(HttpEventSink::new(url, MONITOR_TIMEOUT)?)
        }
        None => None,
    };

    // Create shared state
    let state = AppState::from_parts(config, builds, workers, dispatcher, cache);
    let token = install_shutdown_handler();

    // Background tasks
    let mut tasks = JoinSet::new();
    if let Some(sink) = monitor {
        tasks.spawn(forward_events(sink, state.subscribe(), token.clone()));
    }
    tasks.spawn(Scheduler::new(state.clone()).run(token.clone()));
    tasks.spawn(LivenessMonitor::new(state.clone()).run(token.clone()));
    if let Some(store) = store {
        tasks.spawn(Snapshotter::new(state.clone(), store).run(token.clone()));
    }

    // Start HTTP server
    let listener = TcpListener::bind(http_addr).await?;
    info!(http_addr = %http_addr, "Starting BuildFleet coordinator");

    let shutdown = token.clone();
    let result = axum::serve(listener, http::create_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await;
    if let Err(e) = &result {
        error!(error = %e, "HTTP server error");
    }

    // Stop the loops and wait for the final snapshot
    token.cancel();
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Background task panicked");
        }
    }

    info!("Coordinator stopped");
    result?;
    Ok(())
}
