//! Canonical default values shared across the gateway and worker agent.

use std::time::Duration;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:11500";
pub const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:11500";
pub const DEFAULT_RUNTIME_URL: &str = "http://127.0.0.1:11434";

/// `owned_by` value reported for every model in `/v1/models`.
pub const GATEWAY_OWNER: &str = "gridway";

/// Heartbeat silence after which a worker is declared lost.
pub const DEFAULT_LIVENESS_THRESHOLD: Duration = Duration::from_secs(30);
/// Worker agent heartbeat cadence.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// Total dispatch attempts per job, counting the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Bound on client-visible termination after a cancel.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(2);
/// Queued jobs beyond this are rejected with QueueFull.
pub const DEFAULT_QUEUE_DEPTH_LIMIT: usize = 512;
/// Deadline applied when a request carries no timeout of its own.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
