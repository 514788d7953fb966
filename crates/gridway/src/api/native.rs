//! Native flavor handlers.
//!
//! These pass worker fields through directly: the request bodies mirror the
//! worker wire protocol, and streaming responses are newline-delimited JSON
//! records like the ones workers emit.

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use gridway_protocol::error::ApiError;
use gridway_protocol::{
    ChatMessage, EmbedInput, GenerationOptions, InferenceRequest, PassthroughOptions, Priority,
    Protocol, RequestPayload, SubmissionMeta,
};
use gridway_scheduler::{Completion, JobError, JobEvent, JobHandle};

use super::{job_error_to_api, ApiFailure, AppState};

fn default_stream() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default = "default_stream")]
    pub stream: bool,
    #[serde(default)]
    pub options: GenerationOptions,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(flatten)]
    pub passthrough: PassthroughOptions,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_stream")]
    pub stream: bool,
    #[serde(default)]
    pub options: GenerationOptions,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(flatten)]
    pub passthrough: PassthroughOptions,
}

#[derive(Debug, Deserialize)]
pub struct EmbedRequest {
    pub model: String,
    pub input: EmbedInput,
    #[serde(default)]
    pub options: GenerationOptions,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// One line of a native response, streaming or aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct NativeRecord {
    pub model: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<Vec<Vec<f32>>>,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NativeRecord {
    fn empty(model: &str) -> Self {
        Self {
            model: model.to_string(),
            created_at: Utc::now().to_rfc3339(),
            response: None,
            message: None,
            embeddings: None,
            done: false,
            done_reason: None,
            prompt_eval_count: None,
            eval_count: None,
            total_duration: None,
            error: None,
        }
    }

    fn delta(model: &str, kind: NativeKind, text: String) -> Self {
        let mut record = Self::empty(model);
        match kind {
            NativeKind::Generate => record.response = Some(text),
            NativeKind::Chat => {
                record.message = Some(ChatMessage {
                    role: "assistant".to_string(),
                    content: text,
                    images: None,
                })
            }
        }
        record
    }

    fn terminal(model: &str, kind: NativeKind, completion: &Completion, text: Option<String>) -> Self {
        let mut record = match text {
            Some(text) => Self::delta(model, kind, text),
            None => Self::empty(model),
        };
        record.done = true;
        record.done_reason = Some(completion.finish_reason.as_str().to_string());
        record.embeddings = completion.embeddings.clone();
        if let Some(usage) = completion.usage {
            record.prompt_eval_count = Some(usage.prompt_tokens);
            record.eval_count = Some(usage.completion_tokens);
        }
        record.total_duration = completion.total_duration;
        record
    }

    fn failure(model: &str, error: &JobError) -> Self {
        let mut record = Self::empty(model);
        record.done = true;
        record.error = Some(error.to_string());
        record
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NativeKind {
    Generate,
    Chat,
}

/// `POST /api/generate`
pub async fn generate(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiFailure> {
    let request: GenerateRequest = parse_body(&body)?;
    require_model(&request.model)?;

    let inference = InferenceRequest {
        model: request.model.clone(),
        payload: RequestPayload::Generate {
            prompt: request.prompt,
        },
        options: request.options,
        passthrough: request.passthrough,
        priority: request.priority,
        stream: request.stream,
        timeout: request.timeout_ms.map(Duration::from_millis),
        meta: meta_from(connect_info, &headers),
    };
    respond(&state, inference, NativeKind::Generate, request.stream).await
}

/// `POST /api/chat`
pub async fn chat(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiFailure> {
    let request: ChatRequest = parse_body(&body)?;
    require_model(&request.model)?;

    let inference = InferenceRequest {
        model: request.model.clone(),
        payload: RequestPayload::Chat {
            messages: request.messages,
        },
        options: request.options,
        passthrough: request.passthrough,
        priority: request.priority,
        stream: request.stream,
        timeout: request.timeout_ms.map(Duration::from_millis),
        meta: meta_from(connect_info, &headers),
    };
    respond(&state, inference, NativeKind::Chat, request.stream).await
}

/// `POST /api/embed` - embeddings never stream.
pub async fn embed(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiFailure> {
    let request: EmbedRequest = parse_body(&body)?;
    require_model(&request.model)?;

    let inference = InferenceRequest {
        model: request.model.clone(),
        payload: RequestPayload::Embed {
            input: request.input,
        },
        options: request.options,
        passthrough: PassthroughOptions::default(),
        priority: request.priority,
        stream: false,
        timeout: request.timeout_ms.map(Duration::from_millis),
        meta: meta_from(connect_info, &headers),
    };
    respond(&state, inference, NativeKind::Generate, false).await
}

/// `DELETE /api/jobs/:id` - cancel a job at any state.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    if state.scheduler.cancel(id.into()) {
        Ok(Json(serde_json::json!({ "cancelled": true })))
    } else {
        Err(ApiError::not_found(format!("unknown job {}", id), "unknown_job").into())
    }
}

async fn respond(
    state: &AppState,
    inference: InferenceRequest,
    kind: NativeKind,
    stream: bool,
) -> Result<Response, ApiFailure> {
    let model = inference.model.clone();
    if stream {
        let handle = state
            .scheduler
            .submit_streaming(inference)
            .map_err(|e| ApiFailure(job_error_to_api(&e)))?;
        Ok(ndjson_response(handle, model, kind))
    } else {
        let handle = state
            .scheduler
            .submit(inference)
            .map_err(|e| ApiFailure(job_error_to_api(&e)))?;
        let completion = handle
            .into_result()
            .await
            .map_err(|e| ApiFailure(job_error_to_api(&e)))?;
        let text = completion.text.clone();
        Ok(Json(NativeRecord::terminal(&model, kind, &completion, text)).into_response())
    }
}

/// Translate job events into native wire records.
async fn drive_native_stream(
    mut handle: JobHandle,
    model: String,
    kind: NativeKind,
    tx: mpsc::UnboundedSender<NativeRecord>,
) {
    loop {
        match handle.next_event().await {
            Some(JobEvent::Chunk(text)) => {
                if tx.send(NativeRecord::delta(&model, kind, text)).is_err() {
                    return;
                }
            }
            Some(JobEvent::Complete(completion)) => {
                let _ = tx.send(NativeRecord::terminal(&model, kind, &completion, None));
                return;
            }
            Some(JobEvent::Error(error)) => {
                let _ = tx.send(NativeRecord::failure(&model, &error));
                return;
            }
            None => return,
        }
    }
}

fn ndjson_response(handle: JobHandle, model: String, kind: NativeKind) -> Response {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(drive_native_stream(handle, model, kind, tx));

    let stream = UnboundedReceiverStream::new(rx).map(|record| {
        let mut line = serde_json::to_vec(&record).unwrap_or_default();
        line.push(b'\n');
        Ok::<_, Infallible>(Bytes::from(line))
    });
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    )
        .into_response()
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiFailure> {
    serde_json::from_slice(body).map_err(|e| {
        ApiFailure(ApiError::invalid_request(
            format!("could not parse request body: {}", e),
            "body",
        ))
    })
}

fn require_model(model: &str) -> Result<(), ApiFailure> {
    if model.is_empty() {
        return Err(ApiError::invalid_request("model is required", "model").into());
    }
    Ok(())
}

fn meta_from(connect_info: Option<ConnectInfo<SocketAddr>>, headers: &HeaderMap) -> SubmissionMeta {
    SubmissionMeta {
        client_ip: connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        submitted_at: Utc::now(),
        protocol: Protocol::Native,
    }
}
