//! Gridway worker agent.
//!
//! Registers a local inference runtime with the gateway and keeps the
//! registration alive.
//!
//! Usage:
//!     gridway-worker --gateway http://127.0.0.1:11500 --runtime http://127.0.0.1:11434

use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use gridway_protocol::defaults;
use gridway_worker::{Agent, AgentConfig};

#[derive(Parser, Debug)]
#[command(name = "gridway-worker", about = "Worker agent for the Gridway gateway")]
struct Args {
    /// Gateway base URL
    #[arg(long, env = "GRIDWAY_GATEWAY", default_value = defaults::DEFAULT_GATEWAY_URL)]
    gateway: String,

    /// Local inference runtime base URL
    #[arg(long, env = "GRIDWAY_RUNTIME", default_value = defaults::DEFAULT_RUNTIME_URL)]
    runtime: String,

    /// Address the gateway should dial for inference (defaults to --runtime)
    #[arg(long)]
    advertise: Option<String>,

    /// Worker ID (auto-generated if not provided)
    #[arg(long)]
    worker_id: Option<String>,

    /// Maximum concurrent jobs to accept
    #[arg(long, default_value_t = 4)]
    max_concurrency: u32,

    /// Heartbeat cadence in seconds
    #[arg(long, default_value_t = defaults::DEFAULT_HEARTBEAT_INTERVAL.as_secs())]
    heartbeat_interval: u64,

    /// Mirror the full log filter to stderr
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    gridway_logging::init_logging(gridway_logging::LogConfig {
        app_name: "gridway-worker",
        verbose: args.verbose,
    })?;

    let worker_id = args.worker_id.unwrap_or_else(|| {
        let tag = uuid::Uuid::new_v4().to_string();
        format!("worker-{}", tag.split('-').next().unwrap_or("0"))
    });

    info!("Starting Gridway worker agent");
    info!("  Gateway: {}", args.gateway);
    info!("  Runtime: {}", args.runtime);
    info!("  Worker ID: {}", worker_id);

    let config = AgentConfig {
        advertise_url: args.advertise.clone().unwrap_or_else(|| args.runtime.clone()),
        gateway_url: args.gateway,
        runtime_url: args.runtime,
        worker_id,
        max_concurrency: args.max_concurrency,
        heartbeat_interval: Duration::from_secs(args.heartbeat_interval),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut agent = Agent::new(config);
    agent.run(shutdown_rx).await
}
