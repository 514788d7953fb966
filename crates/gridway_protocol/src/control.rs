//! Worker control-plane DTOs, shared by the gateway and the worker agent.

use serde::{Deserialize, Serialize};

use crate::types::{LoadSnapshot, SessionToken, WorkerCapabilities, WorkerId};

/// `POST /internal/workers` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub worker_id: WorkerId,
    /// Address the gateway dials with the native wire protocol.
    pub address: String,
    pub capabilities: WorkerCapabilities,
}

/// `POST /internal/workers` response body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub token: SessionToken,
}

/// `POST /internal/workers/:id/heartbeat` request body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub token: SessionToken,
    #[serde(default)]
    pub load: LoadSnapshot,
}
