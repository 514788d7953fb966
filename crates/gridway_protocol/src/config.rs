//! Scheduler configuration shared by the gateway binary and tests.

use std::time::Duration;

use crate::defaults;

/// Knobs read by the scheduler core. The gateway binary fills this from
/// flags and environment; tests construct it directly.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Heartbeat silence after which a worker transitions to `lost`.
    pub liveness_threshold: Duration,
    /// Total dispatch attempts per job, counting the first.
    pub max_attempts: u32,
    /// Bound on client-visible termination after cancellation.
    pub cancel_grace: Duration,
    /// Maximum queued jobs across all priorities.
    pub queue_depth_limit: usize,
    /// Deadline applied when a request carries no timeout.
    pub request_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            liveness_threshold: defaults::DEFAULT_LIVENESS_THRESHOLD,
            max_attempts: defaults::DEFAULT_MAX_ATTEMPTS,
            cancel_grace: defaults::DEFAULT_CANCEL_GRACE,
            queue_depth_limit: defaults::DEFAULT_QUEUE_DEPTH_LIMIT,
            request_timeout: defaults::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}
