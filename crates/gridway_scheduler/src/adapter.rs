//! Worker Adapter - the only component that speaks the worker wire protocol.
//!
//! The dispatcher depends on this trait; production uses the HTTP
//! implementation, tests substitute an in-process mock. Failures are
//! classified per request: transport failures (connect, reset) look like a
//! lost worker to the retry policy, while an error *response* is final.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use gridway_protocol::wire::{self, DispatchBody, WorkerRecord};
use gridway_protocol::JobId;

/// Failure of a single adapter call.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// The worker could not be reached or the connection died.
    #[error("worker unreachable: {0}")]
    Unreachable(String),

    /// The worker answered with an error status.
    #[error("worker returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The worker's response body could not be decoded.
    #[error("malformed worker response: {0}")]
    Decode(String),
}

impl AdapterError {
    /// Transport-level failures are indistinguishable from a dying worker
    /// and feed the same retry policy as `WorkerLost`.
    pub fn is_transport(&self) -> bool {
        matches!(self, AdapterError::Unreachable(_))
    }
}

/// Byte stream of a worker's streaming response. The broker owns record
/// framing; this is raw transport.
pub struct ChunkSource {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, AdapterError>> + Send>>,
}

impl ChunkSource {
    pub fn new(stream: impl Stream<Item = Result<Bytes, AdapterError>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }

    pub async fn next(&mut self) -> Option<Result<Bytes, AdapterError>> {
        self.inner.next().await
    }
}

/// Scheduler-side interface to a worker.
#[async_trait]
pub trait WorkerAdapter: Send + Sync {
    /// Run a request to completion and return the single terminal record.
    async fn dispatch(
        &self,
        address: &str,
        body: DispatchBody,
    ) -> Result<WorkerRecord, AdapterError>;

    /// Open a streaming response; records arrive newline-delimited.
    async fn dispatch_streaming(
        &self,
        address: &str,
        body: DispatchBody,
    ) -> Result<ChunkSource, AdapterError>;

    /// Best-effort cancellation signal; errors are ignored.
    async fn cancel(&self, address: &str, job_id: JobId);

    /// Probe a worker's runtime.
    async fn health(&self, address: &str) -> Result<(), AdapterError>;
}

/// HTTP implementation of the worker wire protocol.
pub struct HttpWorkerAdapter {
    client: reqwest::Client,
}

impl HttpWorkerAdapter {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self { client }
    }

    /// Extract the runtime's error message from a non-success response.
    async fn error_from_response(response: reqwest::Response) -> AdapterError {
        let status = response.status().as_u16();
        let message = match response.json::<WorkerRecord>().await {
            Ok(record) => record.error.unwrap_or_else(|| "unknown error".to_string()),
            Err(_) => "unreadable error body".to_string(),
        };
        AdapterError::Http { status, message }
    }

    async fn post(
        &self,
        address: &str,
        body: &DispatchBody,
    ) -> Result<reqwest::Response, AdapterError> {
        let url = format!("{}{}", address.trim_end_matches('/'), body.endpoint());
        debug!("Dispatching {} to {}", body.model, url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| AdapterError::Unreachable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        Ok(response)
    }
}

impl Default for HttpWorkerAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkerAdapter for HttpWorkerAdapter {
    async fn dispatch(
        &self,
        address: &str,
        body: DispatchBody,
    ) -> Result<WorkerRecord, AdapterError> {
        let response = self.post(address, &body).await?;
        response
            .json::<WorkerRecord>()
            .await
            .map_err(|e| AdapterError::Decode(e.to_string()))
    }

    async fn dispatch_streaming(
        &self,
        address: &str,
        body: DispatchBody,
    ) -> Result<ChunkSource, AdapterError> {
        let response = self.post(address, &body).await?;
        let stream = response
            .bytes_stream()
            .map(|item| item.map_err(|e| AdapterError::Unreachable(e.to_string())));
        Ok(ChunkSource::new(stream))
    }

    async fn cancel(&self, address: &str, job_id: JobId) {
        let url = format!("{}{}", address.trim_end_matches('/'), wire::CANCEL_PATH);
        let result = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "id": job_id }))
            .send()
            .await;
        if let Err(e) = result {
            debug!("Cancel signal for job {} not delivered: {}", job_id, e);
        }
    }

    async fn health(&self, address: &str) -> Result<(), AdapterError> {
        let url = format!("{}{}", address.trim_end_matches('/'), wire::TAGS_PATH);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AdapterError::Unreachable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AdapterError::Http {
                status: response.status().as_u16(),
                message: "health probe failed".to_string(),
            });
        }
        Ok(())
    }
}
