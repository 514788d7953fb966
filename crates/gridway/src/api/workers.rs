//! Worker control plane and health endpoints.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use tracing::debug;

use gridway_protocol::control::{HeartbeatRequest, RegisterRequest, RegisterResponse};
use gridway_protocol::error::ApiError;
use gridway_protocol::WorkerId;
use gridway_scheduler::{QueueDepths, WorkerSnapshot};

use super::{registry_error_to_api, ApiFailure, AppState};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub workers: usize,
    pub queue: QueueDepths,
    pub in_flight: usize,
}

/// `POST /internal/workers`
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiFailure> {
    if request.address.is_empty() {
        return Err(ApiError::invalid_request("address is required", "address").into());
    }
    let token = state
        .scheduler
        .register(request.worker_id, request.capabilities, request.address)
        .map_err(|e| ApiFailure(registry_error_to_api(&e)))?;
    Ok(Json(RegisterResponse { token }))
}

/// `POST /internal/workers/:id/heartbeat`
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    state
        .scheduler
        .heartbeat(&WorkerId::from(id), request.token, request.load)
        .map_err(|e| ApiFailure(registry_error_to_api(&e)))?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// `DELETE /internal/workers/:id` - drain, then remove.
pub async fn deregister(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let id = WorkerId::from(id);
    if state.scheduler.deregister(&id) {
        debug!("Deregistration accepted for [{}]", id);
        Ok(Json(serde_json::json!({ "ok": true })))
    } else {
        Err(ApiError::not_found(format!("unknown worker '{}'", id), "unknown_worker").into())
    }
}

/// `GET /internal/workers` - observability snapshot.
pub async fn list(State(state): State<AppState>) -> Json<Vec<WorkerSnapshot>> {
    Json(state.scheduler.list_workers())
}

/// `GET /healthz`
pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        workers: state.scheduler.list_workers().len(),
        queue: state.scheduler.queue_depths(),
        in_flight: state.scheduler.inflight_snapshot().len(),
    })
}
