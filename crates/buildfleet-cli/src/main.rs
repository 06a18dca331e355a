//! BuildFleet CLI - Command line interface for the BuildFleet coordinator.

mod client;

use std::collections::HashMap;

use clap::{Parser, Subcommand};
use serde::Deserialize;

use buildfleet_core::{Build, BuildRequest, BuildStatus};

use client::ApiClient;

/// BuildFleet CLI - Coordinator management tool
#[derive(Parser)]
#[command(name = "buildfleet")]
#[command(about = "CLI for the BuildFleet coordinator", long_about = None)]
struct Cli {
    /// Coordinator address
    #[arg(short, long, env = "BUILDFLEET_ADDR", default_value = "http://127.0.0.1:8080")]
    addr: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a build
    Submit {
        /// Project to build
        #[arg(short, long)]
        project: String,

        /// Task to run (compile, test, package, ...)
        #[arg(short, long)]
        task: String,

        /// Priority, higher runs sooner
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        priority: i32,

        /// Reuse cached artifacts when available
        #[arg(long)]
        cache: bool,

        /// Build option as key=value (repeatable)
        #[arg(short, long = "option", value_parser = parse_option)]
        options: Vec<(String, String)>,
    },

    /// Get build status
    Status {
        /// Build ID
        id: String,
    },

    /// Cancel a build
    Cancel {
        /// Build ID to cancel
        id: String,
    },

    /// List builds
    #[command(name = "list-builds")]
    ListBuilds {
        /// Only builds with this status
        #[arg(short, long)]
        status: Option<BuildStatus>,

        /// Maximum number of builds to show
        #[arg(short, long, default_value_t = 100)]
        limit: usize,
    },

    /// List registered workers
    #[command(name = "list-workers")]
    ListWorkers,

    /// Show coordinator counters
    Metrics,
}

#[derive(Deserialize)]
struct SubmitResponse {
    build_id: String,
    status: BuildStatus,
}

#[derive(Deserialize)]
struct StatusResponse {
    build_id: String,
    status: BuildStatus,
    progress: f64,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    worker_id: Option<String>,
    retry_count: u32,
}

#[derive(Deserialize)]
struct CancelResponse {
    status: BuildStatus,
}

#[derive(Deserialize)]
struct BuildList {
    builds: Vec<Build>,
}

#[derive(Deserialize)]
struct WorkerRow {
    worker_id: String,
    address: String,
    status: String,
    capacity: u32,
    active_builds: u32,
    #[serde(default)]
    capabilities: Vec<String>,
    last_heartbeat: String,
}

#[derive(Deserialize)]
struct WorkerList {
    workers: Vec<WorkerRow>,
}

#[derive(Deserialize)]
struct WorkerCounts {
    total: usize,
    available: usize,
    busy: usize,
    offline: usize,
    capacity: u64,
    active_builds: u64,
}

#[derive(Deserialize)]
struct Metrics {
    total: u64,
    queued: u64,
    active: u64,
    completed: u64,
    failed: u64,
    cancelled: u64,
    #[serde(default)]
    retried: u64,
    #[serde(default)]
    cache_hits: u64,
    workers: WorkerCounts,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = ApiClient::new(&cli.addr);

    match cli.command {
        Commands::Submit {
            project,
            task,
            priority,
            cache,
            options,
        } => {
            let request = BuildRequest {
                project,
                task,
                priority,
                cache_enabled: cache,
                options: options.into_iter().collect::<HashMap<_, _>>(),
            };
            submit(&client, &request).await?;
        }
        Commands::Status { id } => {
            status(&client, &id).await?;
        }
        Commands::Cancel { id } => {
            cancel(&client, &id).await?;
        }
        Commands::ListBuilds { status, limit } => {
            list_builds(&client, status, limit).await?;
        }
        Commands::ListWorkers => {
            list_workers(&client).await?;
        }
        Commands::Metrics => {
            metrics(&client).await?;
        }
    }

    Ok(())
}

async fn submit(
    client: &ApiClient,
    request: &BuildRequest,
) -> Result<(), Box<dyn std::error::Error>> {
    let resp: SubmitResponse = client.post("/api/builds", request).await?;

    println!("Build submitted:");
    println!("  ID:         {}", resp.build_id);
    println!("  Status:     {}", resp.status.as_str().to_uppercase());

    Ok(())
}

async fn status(client: &ApiClient, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let resp: StatusResponse = client.get(&format!("/api/builds/{id}/status")).await?;

    println!("  ID:         {}", resp.build_id);
    println!("  Status:     {}", resp.status.as_str().to_uppercase());
    println!("  Progress:   {}", format_progress(resp.progress));
    println!("  Retries:    {}", resp.retry_count);
    if let Some(worker) = resp.worker_id {
        println!("  Worker:     {worker}");
    }
    if let Some(error) = resp.error {
        println!("  Error:      {error}");
    }

    Ok(())
}

async fn cancel(client: &ApiClient, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let resp: CancelResponse = client.delete(&format!("/api/builds/{id}")).await?;

    println!("Build {id}: {}", resp.status.as_str().to_uppercase());

    Ok(())
}

async fn list_builds(
    client: &ApiClient,
    status: Option<BuildStatus>,
    limit: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut path = format!("/api/builds?limit={limit}");
    if let Some(status) = status {
        path.push_str(&format!("&status={}", status.as_str()));
    }
    let resp: BuildList = client.get(&path).await?;

    println!("Builds ({}):", resp.builds.len());
    println!(
        "{:<36}  {:<10}  {:>4}  {:<16}  {:<12}  {}",
        "ID", "STATUS", "PRIO", "PROJECT", "TASK", "SUBMITTED"
    );
    println!("{}", "-".repeat(100));

    for build in resp.builds {
        println!(
            "{:<36}  {:<10}  {:>4}  {:<16}  {:<12}  {}",
            build.id,
            build.status.as_str().to_uppercase(),
            build.priority,
            build.project,
            build.task,
            build.submitted_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

async fn list_workers(client: &ApiClient) -> Result<(), Box<dyn std::error::Error>> {
    let resp: WorkerList = client.get("/api/workers").await?;

    println!("Workers ({}):", resp.workers.len());
    println!(
        "{:<20}  {:<10}  {:<7}  {:<28}  {:<20}  {}",
        "ID", "STATUS", "SLOTS", "ADDRESS", "LAST HEARTBEAT", "TASKS"
    );
    println!("{}", "-".repeat(110));

    for worker in resp.workers {
        let slots = format!("{}/{}", worker.active_builds, worker.capacity);
        let tasks = if worker.capabilities.is_empty() {
            "*".to_string()
        } else {
            worker.capabilities.join(", ")
        };
        println!(
            "{:<20}  {:<10}  {:<7}  {:<28}  {:<20}  {}",
            worker.worker_id,
            worker.status.to_uppercase(),
            slots,
            worker.address,
            format_timestamp(&worker.last_heartbeat),
            tasks
        );
    }

    Ok(())
}

async fn metrics(client: &ApiClient) -> Result<(), Box<dyn std::error::Error>> {
    let m: Metrics = client.get("/api/metrics").await?;

    println!("Builds:");
    println!("  Submitted:  {}", m.total);
    println!("  Queued:     {}", m.queued);
    println!("  Active:     {}", m.active);
    println!("  Completed:  {}", m.completed);
    println!("  Failed:     {}", m.failed);
    println!("  Cancelled:  {}", m.cancelled);
    println!("  Retried:    {}", m.retried);
    println!("  Cache hits: {}", m.cache_hits);
    println!("Workers:");
    println!(
        "  Total:      {} ({} available, {} busy, {} offline)",
        m.workers.total, m.workers.available, m.workers.busy, m.workers.offline
    );
    println!(
        "  Slots:      {}/{} in use",
        m.workers.active_builds, m.workers.capacity
    );

    Ok(())
}

/// Parse a `key=value` build option.
fn parse_option(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty option key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn format_progress(progress: f64) -> String {
    format!("{:.0}%", progress.clamp(0.0, 1.0) * 100.0)
}

fn format_timestamp(rfc3339: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(rfc3339)
        .map(|dt| {
            dt.with_timezone(&chrono::Utc)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|_| rfc3339.to_string())
}
