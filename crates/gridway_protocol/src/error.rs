//! Client-facing error surface.
//!
//! Every error returned to a client is wrapped in `{ "error": { ... } }`
//! with a `message`, a `type`, and (depending on kind) `param` and `code`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// HTTP status classes the gateway produces.
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_CONFLICT: u16 = 409;
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;
pub const STATUS_INTERNAL: u16 = 500;

/// A client-visible error with its HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ApiError {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip)]
    pub status: u16,
}

impl ApiError {
    /// Validation failure, reported with the offending parameter path.
    pub fn invalid_request(message: impl Into<String>, param: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: "invalid_request_error".to_string(),
            param: Some(param.into()),
            code: None,
            status: STATUS_BAD_REQUEST,
        }
    }

    /// The requested model is unavailable fleet-wide.
    pub fn model_not_found(model: &str) -> Self {
        Self {
            message: format!("The model '{}' does not exist", model),
            error_type: "invalid_request_error".to_string(),
            param: Some("model".to_string()),
            code: Some("model_not_found".to_string()),
            status: STATUS_NOT_FOUND,
        }
    }

    /// A named resource (worker, job) does not exist.
    pub fn not_found(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: "invalid_request_error".to_string(),
            param: None,
            code: Some(code.into()),
            status: STATUS_NOT_FOUND,
        }
    }

    /// The request conflicts with current state (stale session, taken
    /// address).
    pub fn conflict(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: "invalid_request_error".to_string(),
            param: None,
            code: Some(code.into()),
            status: STATUS_CONFLICT,
        }
    }

    /// The queue rejected the request; the client may retry later.
    pub fn overloaded(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: "server_error".to_string(),
            param: None,
            code: Some("overloaded".to_string()),
            status: STATUS_TOO_MANY_REQUESTS,
        }
    }

    /// Dispatcher or worker failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: "server_error".to_string(),
            param: None,
            code: Some("internal_error".to_string()),
            status: STATUS_INTERNAL,
        }
    }

    pub fn into_envelope(self) -> ErrorEnvelope {
        ErrorEnvelope { error: self }
    }
}

/// The `{ "error": { ... } }` wrapper clients observe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ApiError,
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}
