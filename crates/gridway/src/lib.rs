//! Gridway gateway library.
//!
//! Exposes the HTTP surface and CLI arguments so the binary stays thin and
//! tests can drive handlers directly.

pub mod api;

pub use api::{router, AppState};

use std::time::Duration;

use gridway_protocol::config::SchedulerConfig;
use gridway_protocol::defaults;

#[derive(clap::Parser, Debug)]
#[command(name = "gridway", about = "Distributed LLM inference gateway")]
pub struct GatewayArgs {
    /// Listen address for clients and the worker control plane
    #[arg(long, env = "GRIDWAY_BIND", default_value = defaults::DEFAULT_BIND_ADDR)]
    pub bind: String,

    /// Heartbeat silence (seconds) after which a worker is declared lost
    #[arg(long, env = "GRIDWAY_LIVENESS_THRESHOLD", default_value_t = defaults::DEFAULT_LIVENESS_THRESHOLD.as_secs())]
    pub liveness_threshold: u64,

    /// Total dispatch attempts per job, counting the first
    #[arg(long, env = "GRIDWAY_MAX_ATTEMPTS", default_value_t = defaults::DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// Bound (seconds) on client-visible termination after a cancel
    #[arg(long, env = "GRIDWAY_CANCEL_GRACE", default_value_t = defaults::DEFAULT_CANCEL_GRACE.as_secs())]
    pub cancel_grace: u64,

    /// Maximum queued jobs across all priorities
    #[arg(long, env = "GRIDWAY_QUEUE_DEPTH_LIMIT", default_value_t = defaults::DEFAULT_QUEUE_DEPTH_LIMIT)]
    pub queue_depth_limit: usize,

    /// Default job timeout (seconds) when a request carries none
    #[arg(long, env = "GRIDWAY_REQUEST_TIMEOUT", default_value_t = defaults::DEFAULT_REQUEST_TIMEOUT.as_secs())]
    pub request_timeout: u64,

    /// Mirror the full log filter to stderr
    #[arg(long, short)]
    pub verbose: bool,
}

impl GatewayArgs {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            liveness_threshold: Duration::from_secs(self.liveness_threshold),
            max_attempts: self.max_attempts,
            cancel_grace: Duration::from_secs(self.cancel_grace),
            queue_depth_limit: self.queue_depth_limit,
            request_timeout: Duration::from_secs(self.request_timeout),
        }
    }
}
