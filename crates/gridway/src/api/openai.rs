//! OpenAI-compatible completions handlers.
//!
//! `/v1/completions` translates the OpenAI parameter set into a native
//! generation request, then either aggregates the result into a completions
//! object or streams completion frames over SSE, terminated by `[DONE]`.

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use futures::StreamExt;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use gridway_protocol::error::{ApiError, ErrorEnvelope};
use gridway_protocol::openai::{
    Completion, CompletionChoice, CompletionRequest, ModelList, Usage, DONE_SENTINEL,
};
use gridway_protocol::{
    defaults, InferenceRequest, JobId, PassthroughOptions, Protocol, RequestPayload,
    SubmissionMeta,
};
use gridway_scheduler::{JobEvent, JobHandle};

use super::{job_error_to_api, ApiFailure, AppState};

/// `GET /v1/models` - union of model inventories across ready workers.
pub async fn models(State(state): State<AppState>) -> Json<ModelList> {
    Json(ModelList::from_descriptors(
        &state.scheduler.available_models(),
        defaults::GATEWAY_OWNER,
    ))
}

/// `POST /v1/completions`
pub async fn completions(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiFailure> {
    let request: CompletionRequest = serde_json::from_slice(&body).map_err(|e| {
        ApiError::invalid_request(format!("could not parse request body: {}", e), "body")
    })?;
    if request.model.is_empty() {
        return Err(ApiError::invalid_request("model is required", "model").into());
    }
    let prompt = request.coerced_prompt()?;

    let meta = SubmissionMeta {
        client_ip: connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        submitted_at: Utc::now(),
        protocol: Protocol::OpenAi,
    };
    let inference = InferenceRequest {
        model: request.model.clone(),
        payload: RequestPayload::Generate {
            prompt: prompt.clone(),
        },
        options: request.translated_options(),
        passthrough: PassthroughOptions {
            suffix: request.suffix.clone(),
            ..Default::default()
        },
        priority: Default::default(),
        stream: request.stream,
        timeout: None,
        meta,
    };
    let created = Utc::now().timestamp();

    if request.stream {
        let include_usage = request.include_usage();
        let handle = state
            .scheduler
            .submit_streaming(inference)
            .map_err(|e| ApiFailure(job_error_to_api(&e)))?;
        let context = StreamContext {
            job_id: handle.job_id(),
            created,
            model: request.model,
            echo_prefix: request.echo.then_some(prompt),
            include_usage,
        };
        Ok(sse_response(handle, context))
    } else {
        let handle = state
            .scheduler
            .submit(inference)
            .map_err(|e| ApiFailure(job_error_to_api(&e)))?;
        let job_id = handle.job_id();
        let result = handle
            .into_result()
            .await
            .map_err(|e| ApiFailure(job_error_to_api(&e)))?;

        let mut text = result.text.unwrap_or_default();
        if request.echo {
            text = format!("{}{}", prompt, text);
        }
        let usage = result
            .usage
            .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();
        Ok(Json(Completion::new(
            job_id,
            created,
            request.model,
            vec![CompletionChoice::new(text, Some(result.finish_reason))],
            Some(usage),
        ))
        .into_response())
    }
}

// ============================================================================
// Streaming frames
// ============================================================================

struct StreamContext {
    job_id: JobId,
    created: i64,
    model: String,
    /// With `echo=true`, the prompt to prepend to the first chunk only.
    echo_prefix: Option<String>,
    include_usage: bool,
}

enum Frame {
    Data(Completion),
    Error(ErrorEnvelope),
    Done,
}

/// Translate job events into completion frames. Ends after the terminal
/// frame: `Done` after a completion, nothing after an error envelope.
async fn drive_stream(mut handle: JobHandle, context: StreamContext, tx: mpsc::UnboundedSender<Frame>) {
    let mut echo_prefix = context.echo_prefix;
    loop {
        match handle.next_event().await {
            Some(JobEvent::Chunk(text)) => {
                let text = match echo_prefix.take() {
                    Some(prefix) => format!("{}{}", prefix, text),
                    None => text,
                };
                let frame = Completion::new(
                    context.job_id,
                    context.created,
                    &context.model,
                    vec![CompletionChoice::new(text, None)],
                    None,
                );
                if tx.send(Frame::Data(frame)).is_err() {
                    return;
                }
            }
            Some(JobEvent::Complete(completion)) => {
                // If no chunk ever went out, an echoed prompt still must.
                let text = echo_prefix.take().unwrap_or_default();
                let usage = context.include_usage.then(|| {
                    completion
                        .usage
                        .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
                        .unwrap_or_default()
                });
                let frame = Completion::new(
                    context.job_id,
                    context.created,
                    &context.model,
                    vec![CompletionChoice::new(text, Some(completion.finish_reason))],
                    usage,
                );
                let _ = tx.send(Frame::Data(frame));
                let _ = tx.send(Frame::Done);
                return;
            }
            Some(JobEvent::Error(error)) => {
                let _ = tx.send(Frame::Error(job_error_to_api(&error).into_envelope()));
                return;
            }
            None => return,
        }
    }
}

fn frame_to_event(frame: Frame) -> Result<Event, axum::Error> {
    match frame {
        Frame::Data(completion) => Event::default().json_data(&completion),
        Frame::Error(envelope) => Event::default().json_data(&envelope),
        Frame::Done => Ok(Event::default().data(DONE_SENTINEL)),
    }
}

fn sse_response(handle: JobHandle, context: StreamContext) -> Response {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(drive_stream(handle, context, tx));
    let stream = UnboundedReceiverStream::new(rx).map(frame_to_event);
    Sse::new(stream).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridway_protocol::wire::FinishReason;
    use gridway_scheduler::{sink, Completion as JobCompletion, JobError, TokenUsage};

    fn job_completion() -> JobCompletion {
        JobCompletion {
            text: None,
            embeddings: None,
            finish_reason: FinishReason::Stop,
            usage: Some(TokenUsage {
                prompt_tokens: 1,
                completion_tokens: 2,
            }),
            total_duration: None,
        }
    }

    async fn collect_frames(context: StreamContext, events: Vec<JobEvent>) -> Vec<Frame> {
        let (job_sink, handle) = sink::channel(context.job_id);
        for event in events {
            match event {
                JobEvent::Chunk(text) => {
                    job_sink.chunk(text);
                }
                JobEvent::Complete(completion) => {
                    job_sink.complete(completion);
                }
                JobEvent::Error(error) => {
                    job_sink.fail(error);
                }
            }
        }
        let (tx, mut rx) = mpsc::unbounded_channel();
        drive_stream(handle, context, tx).await;

        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn context(echo_prefix: Option<&str>, include_usage: bool) -> StreamContext {
        StreamContext {
            job_id: JobId::new(7),
            created: 1_700_000_000,
            model: "m1".to_string(),
            echo_prefix: echo_prefix.map(str::to_string),
            include_usage,
        }
    }

    /// Worker emits ["He", "llo"] with echo=true, prompt "Hi": the client
    /// observes "HiHe", "llo", a final frame with usage, then [DONE].
    #[tokio::test]
    async fn test_echo_prepended_to_first_frame_only() {
        let frames = collect_frames(
            context(Some("Hi"), true),
            vec![
                JobEvent::Chunk("He".to_string()),
                JobEvent::Chunk("llo".to_string()),
                JobEvent::Complete(job_completion()),
            ],
        )
        .await;

        assert_eq!(frames.len(), 4);
        match &frames[0] {
            Frame::Data(frame) => {
                assert_eq!(frame.choices[0].text, "HiHe");
                assert!(frame.choices[0].finish_reason.is_none());
                assert!(frame.usage.is_none());
                assert_eq!(frame.id, "cmpl-7");
            }
            _ => panic!("expected data frame"),
        }
        match &frames[1] {
            Frame::Data(frame) => assert_eq!(frame.choices[0].text, "llo"),
            _ => panic!("expected data frame"),
        }
        match &frames[2] {
            Frame::Data(frame) => {
                assert_eq!(frame.choices[0].text, "");
                assert_eq!(frame.choices[0].finish_reason, Some(FinishReason::Stop));
                let usage = frame.usage.unwrap();
                assert_eq!(
                    (usage.prompt_tokens, usage.completion_tokens, usage.total_tokens),
                    (1, 2, 3)
                );
            }
            _ => panic!("expected final data frame"),
        }
        assert!(matches!(frames[3], Frame::Done));
    }

    #[tokio::test]
    async fn test_usage_omitted_without_stream_option() {
        let frames = collect_frames(
            context(None, false),
            vec![
                JobEvent::Chunk("x".to_string()),
                JobEvent::Complete(job_completion()),
            ],
        )
        .await;

        match &frames[1] {
            Frame::Data(frame) => assert!(frame.usage.is_none()),
            _ => panic!("expected final data frame"),
        }
    }

    #[tokio::test]
    async fn test_error_event_becomes_error_frame() {
        let frames = collect_frames(
            context(None, false),
            vec![JobEvent::Error(JobError::DeadlineExpired)],
        )
        .await;

        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Error(envelope) => {
                assert_eq!(envelope.error.error_type, "server_error");
            }
            _ => panic!("expected error frame"),
        }
    }

    #[tokio::test]
    async fn test_echoed_prompt_survives_empty_stream() {
        let frames = collect_frames(
            context(Some("Hi"), false),
            vec![JobEvent::Complete(job_completion())],
        )
        .await;

        match &frames[0] {
            Frame::Data(frame) => assert_eq!(frame.choices[0].text, "Hi"),
            _ => panic!("expected data frame"),
        }
    }
}
