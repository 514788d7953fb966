//! HTTP surface of the gateway.
//!
//! Three route groups share one injected scheduler:
//! - OpenAI flavor: `/v1/completions`, `/v1/models`
//! - Native flavor: `/api/generate`, `/api/chat`, `/api/embed`,
//!   `/api/jobs/:id` (cancel)
//! - Worker control plane: `/internal/workers[...]`, `/healthz`

pub mod native;
pub mod openai;
pub mod workers;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use std::sync::Arc;

use gridway_protocol::error::ApiError;
use gridway_scheduler::{JobError, RegistryError, Scheduler};

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(workers::healthz))
        .route("/v1/completions", post(openai::completions))
        .route("/v1/models", get(openai::models))
        .route("/api/generate", post(native::generate))
        .route("/api/chat", post(native::chat))
        .route("/api/embed", post(native::embed))
        .route("/api/jobs/:id", delete(native::cancel_job))
        .route(
            "/internal/workers",
            post(workers::register).get(workers::list),
        )
        .route("/internal/workers/:id/heartbeat", post(workers::heartbeat))
        .route("/internal/workers/:id", delete(workers::deregister))
        .with_state(state)
}

/// Response-shaped error: serializes as `{ "error": { ... } }` with the
/// error's HTTP status.
pub struct ApiFailure(pub ApiError);

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.into_envelope())).into_response()
    }
}

impl From<ApiError> for ApiFailure {
    fn from(error: ApiError) -> Self {
        Self(error)
    }
}

/// Map a scheduler failure onto the client error surface.
pub fn job_error_to_api(error: &JobError) -> ApiError {
    match error {
        JobError::ModelUnavailable { model } => ApiError::model_not_found(model),
        JobError::QueueFull { limit } => {
            ApiError::overloaded(format!("job queue is full (limit {})", limit))
        }
        other => ApiError::internal(other.to_string()),
    }
}

/// Map a registry failure onto the client error surface.
pub fn registry_error_to_api(error: &RegistryError) -> ApiError {
    match error {
        RegistryError::UnknownWorker { worker } => {
            ApiError::not_found(format!("unknown worker '{}'", worker), "unknown_worker")
        }
        RegistryError::StaleSession { worker } => ApiError::conflict(
            format!("stale session for worker '{}'", worker),
            "stale_session",
        ),
        RegistryError::AddressConflict { worker, .. } => ApiError::conflict(
            format!("worker '{}' is registered at a different address", worker),
            "address_conflict",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridway_protocol::WorkerId;

    #[test]
    fn test_job_error_mapping() {
        let err = job_error_to_api(&JobError::ModelUnavailable {
            model: "m1".to_string(),
        });
        assert_eq!(err.status, 404);
        assert_eq!(err.code.as_deref(), Some("model_not_found"));

        let err = job_error_to_api(&JobError::QueueFull { limit: 8 });
        assert_eq!(err.status, 429);

        let err = job_error_to_api(&JobError::DeadlineExpired);
        assert_eq!(err.status, 500);
        assert_eq!(err.error_type, "server_error");
        assert_eq!(err.code.as_deref(), Some("internal_error"));
    }

    #[test]
    fn test_registry_error_mapping() {
        let err = registry_error_to_api(&RegistryError::UnknownWorker {
            worker: WorkerId::from("w1"),
        });
        assert_eq!(err.status, 404);

        let err = registry_error_to_api(&RegistryError::StaleSession {
            worker: WorkerId::from("w1"),
        });
        assert_eq!(err.status, 409);
    }
}
