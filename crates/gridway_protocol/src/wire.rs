//! Native worker wire protocol.
//!
//! The gateway speaks to a worker's inference runtime with a JSON POST and
//! receives either a single JSON object (non-streaming) or newline-delimited
//! JSON records (streaming). Only fields that are present are serialized;
//! the runtime treats absent and null differently for several passthrough
//! fields.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::{
    ChatMessage, EmbedInput, GenerationOptions, InferenceRequest, RequestPayload,
};

/// Endpoint paths on the worker runtime, one per request kind.
pub const GENERATE_PATH: &str = "/api/generate";
pub const CHAT_PATH: &str = "/api/chat";
pub const EMBED_PATH: &str = "/api/embed";
/// Best-effort cancellation signal to the worker runtime.
pub const CANCEL_PATH: &str = "/api/cancel";
/// Model inventory listing on the worker runtime.
pub const TAGS_PATH: &str = "/api/tags";

/// JSON body POSTed to a worker runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchBody {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<EmbedInput>,
    pub stream: bool,
    #[serde(default, skip_serializing_if = "GenerationOptions::is_empty")]
    pub options: GenerationOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub think: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncate: Option<bool>,
}

impl DispatchBody {
    /// Build the wire body for a request, serializing only present fields.
    pub fn from_request(request: &InferenceRequest, stream: bool) -> Self {
        let (prompt, messages, input) = match &request.payload {
            RequestPayload::Generate { prompt } => (Some(prompt.clone()), None, None),
            RequestPayload::Chat { messages } => (None, Some(messages.clone()), None),
            RequestPayload::Embed { input } => (None, None, Some(input.clone())),
        };
        let p = &request.passthrough;
        Self {
            model: request.model.clone(),
            prompt,
            messages,
            input,
            stream,
            options: request.options.clone(),
            suffix: p.suffix.clone(),
            images: p.images.clone(),
            format: p.format.clone(),
            system: p.system.clone(),
            template: p.template.clone(),
            raw: p.raw,
            keep_alive: p.keep_alive.clone(),
            context: p.context.clone(),
            tools: p.tools.clone(),
            think: p.think,
            truncate: p.truncate,
        }
    }

    /// Runtime endpoint for this body, derived from the payload shape.
    pub fn endpoint(&self) -> &'static str {
        if self.input.is_some() {
            EMBED_PATH
        } else if self.messages.is_some() {
            CHAT_PATH
        } else {
            GENERATE_PATH
        }
    }
}

/// Chat delta inside a streaming record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireChatDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// One record from the worker stream (or the single non-streaming response).
///
/// Terminal metadata (`prompt_eval_count`, `eval_count`, `total_duration`,
/// `done_reason`) is present only on the final record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<WireChatDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,
    /// Nanoseconds, as reported by the runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerRecord {
    /// The incremental text carried by this record, if any.
    pub fn text_delta(&self) -> Option<&str> {
        if let Some(response) = self.response.as_deref() {
            return Some(response);
        }
        self.message.as_ref().and_then(|m| m.content.as_deref())
    }

    /// Embedding vectors, normalizing the single-vector form to a batch.
    pub fn embedding_vectors(&self) -> Option<Vec<Vec<f32>>> {
        if let Some(batch) = &self.embeddings {
            return Some(batch.clone());
        }
        self.embedding.as_ref().map(|v| vec![v.clone()])
    }
}

/// Terminal label on a completed generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    Stop,
    Length,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FinishReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop" => Ok(FinishReason::Stop),
            "length" => Ok(FinishReason::Length),
            _ => Err(format!("Invalid finish reason: '{}'", s)),
        }
    }
}

/// Derive the finish reason for a terminal record.
///
/// An explicit `stop`/`length` from the worker is propagated verbatim. With
/// no reported reason, zero completion tokens means the generation was cut
/// off before producing anything (`length`); otherwise `stop`.
pub fn derive_finish_reason(done_reason: Option<&str>, eval_count: Option<u64>) -> FinishReason {
    if let Some(reason) = done_reason {
        if let Ok(parsed) = reason.parse::<FinishReason>() {
            return parsed;
        }
    }
    match eval_count {
        Some(0) => FinishReason::Length,
        _ => FinishReason::Stop,
    }
}
