//! Scheduler error taxonomy.
//!
//! `ModelUnavailable` and `QueueFull` are produced before enqueue and
//! returned synchronously from `submit`. Everything else is asynchronous and
//! terminates the job's event stream. Only `WorkerLost` before any client
//! output is recoverable by retry.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use gridway_protocol::WorkerId;

/// Terminal (or submit-time) failure of a job.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobError {
    /// No ready worker advertises the requested model.
    #[error("no ready worker advertises model '{model}'")]
    ModelUnavailable { model: String },

    /// The queue depth limit was reached.
    #[error("job queue is full (limit {limit})")]
    QueueFull { limit: usize },

    /// The job's absolute deadline passed.
    #[error("deadline expired")]
    DeadlineExpired,

    /// The assigned worker was declared lost while holding the job.
    #[error("worker '{worker}' was lost while running the job")]
    WorkerLost { worker: WorkerId },

    /// The worker stream could not be parsed or closed mid-record.
    #[error("worker stream corrupt: {detail}")]
    TransportCorrupt { detail: String },

    /// The worker returned an error response.
    #[error("worker reported an error: {message}")]
    WorkerReported { message: String },

    /// The client (or an operator) cancelled the job.
    #[error("job was cancelled")]
    Cancelled,
}

impl JobError {
    /// Retry eligibility under the dispatch policy: only a lost worker before
    /// any client-visible output may be recovered.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::WorkerLost { .. })
    }
}

/// Registry mutation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistryError {
    #[error("unknown worker '{worker}'")]
    UnknownWorker { worker: WorkerId },

    /// The presented session token does not match the current registration.
    #[error("stale session for worker '{worker}'")]
    StaleSession { worker: WorkerId },

    /// A live worker with this id is already registered at another address.
    #[error("worker '{worker}' is already registered at {registered}, refusing {offered}")]
    AddressConflict {
        worker: WorkerId,
        registered: String,
        offered: String,
    },
}
