//! Gridway gateway.
//!
//! Fronts a pool of inference workers behind a native and an
//! OpenAI-compatible request surface.
//!
//! Usage:
//!     gridway --bind 127.0.0.1:11500

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use gridway::{api, GatewayArgs};
use gridway_scheduler::{HttpWorkerAdapter, Scheduler, WorkerAdapter};

#[tokio::main]
async fn main() -> Result<()> {
    let args = GatewayArgs::parse();

    gridway_logging::init_logging(gridway_logging::LogConfig {
        app_name: "gridway",
        verbose: args.verbose,
    })?;

    info!("Starting Gridway gateway");
    info!("  Bind: {}", args.bind);
    info!("  Liveness threshold: {}s", args.liveness_threshold);
    info!("  Queue depth limit: {}", args.queue_depth_limit);

    let adapter: Arc<dyn WorkerAdapter> = Arc::new(HttpWorkerAdapter::new());
    let scheduler = Scheduler::new(args.scheduler_config(), adapter);

    let app = api::router(api::AppState {
        scheduler: Arc::clone(&scheduler),
    });
    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;
    info!("Gateway listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server failed")?;

    scheduler.shutdown().await;
    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
