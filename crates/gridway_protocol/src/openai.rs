//! OpenAI-compatible completions surface.
//!
//! Request/response objects for `/v1/completions` and `/v1/models`, plus the
//! translation of OpenAI sampling parameters into native generation options.
//! Compatibility fields the gateway does not implement (`best_of`, `n`,
//! `logprobs`, `logit_bias`) are accepted and ignored; responses always carry
//! `logprobs: null`.

use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::types::{GenerationOptions, ModelDescriptor};
use crate::wire::FinishReason;

/// Sentinel frame terminating an OpenAI event stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Defaults the translation table omits from the wire body.
const DEFAULT_TEMPERATURE: f64 = 1.0;
const DEFAULT_TOP_P: f64 = 1.0;
const DEFAULT_MAX_TOKENS: u64 = 16;

// ============================================================================
// Request
// ============================================================================

/// `prompt` accepts a string or a sequence of strings. Token arrays are part
/// of the OpenAI schema but stringifying them is lossy, so they are rejected
/// during validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PromptInput {
    Text(String),
    Batch(Vec<String>),
    Tokens(Vec<i64>),
    TokenBatch(Vec<Vec<i64>>),
}

impl PromptInput {
    /// Coerce to a single prompt string. Sequences of strings are joined by
    /// newline; token arrays are a validation error.
    pub fn coerce(&self) -> Result<String, ApiError> {
        match self {
            PromptInput::Text(text) => Ok(text.clone()),
            PromptInput::Batch(parts) => Ok(parts.join("\n")),
            PromptInput::Tokens(_) | PromptInput::TokenBatch(_) => Err(ApiError::invalid_request(
                "token-array prompts are not supported; send a string or array of strings",
                "prompt",
            )),
        }
    }
}

/// `stop` accepts a single string or a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopInput {
    One(String),
    Many(Vec<String>),
}

impl StopInput {
    pub fn into_sequence(self) -> Vec<String> {
        match self {
            StopInput::One(stop) => vec![stop],
            StopInput::Many(stops) => stops,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamOptions {
    #[serde(default)]
    pub include_usage: bool,
}

/// `/v1/completions` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: Option<PromptInput>,
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub stop: Option<StopInput>,
    #[serde(default)]
    pub frequency_penalty: Option<f64>,
    #[serde(default)]
    pub presence_penalty: Option<f64>,
    #[serde(default)]
    pub echo: bool,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub stream_options: Option<StreamOptions>,
    #[serde(default)]
    pub user: Option<String>,
    // Accepted for compatibility, ignored beyond validation.
    #[serde(default)]
    pub n: Option<u64>,
    #[serde(default)]
    pub best_of: Option<u64>,
    #[serde(default)]
    pub logprobs: Option<u64>,
    #[serde(default)]
    pub logit_bias: Option<serde_json::Map<String, serde_json::Value>>,
}

impl CompletionRequest {
    /// Whether the final streaming frame should carry token counts.
    pub fn include_usage(&self) -> bool {
        self.stream_options
            .as_ref()
            .map(|o| o.include_usage)
            .unwrap_or(false)
    }

    /// Validate and coerce the prompt.
    pub fn coerced_prompt(&self) -> Result<String, ApiError> {
        match &self.prompt {
            Some(prompt) => prompt.coerce(),
            None => Err(ApiError::invalid_request("prompt is required", "prompt")),
        }
    }

    /// Apply the parameter translation table, producing native generation
    /// options. Values at their OpenAI defaults are omitted.
    pub fn translated_options(&self) -> GenerationOptions {
        let mut options = GenerationOptions::new();

        if let Some(temperature) = self.temperature {
            if temperature != DEFAULT_TEMPERATURE {
                options.insert("temperature".to_string(), json_number(temperature));
            }
        }
        if let Some(top_p) = self.top_p {
            if top_p != DEFAULT_TOP_P {
                options.insert("top_p".to_string(), json_number(top_p));
            }
        }
        if let Some(max_tokens) = self.max_tokens {
            if max_tokens != DEFAULT_MAX_TOKENS {
                options.insert("num_predict".to_string(), serde_json::json!(max_tokens));
            }
        }
        if let Some(seed) = self.seed {
            options.insert("seed".to_string(), serde_json::json!(seed));
        }
        if let Some(stop) = self.stop.clone() {
            options.insert(
                "stop".to_string(),
                serde_json::json!(stop.into_sequence()),
            );
        }
        if let Some(frequency_penalty) = self.frequency_penalty {
            if frequency_penalty != 0.0 {
                options.insert(
                    "frequency_penalty".to_string(),
                    json_number(frequency_penalty),
                );
            }
        }
        if let Some(presence_penalty) = self.presence_penalty {
            if presence_penalty != 0.0 {
                options.insert(
                    "presence_penalty".to_string(),
                    json_number(presence_penalty),
                );
            }
        }

        options
    }
}

fn json_number(value: f64) -> serde_json::Value {
    serde_json::Number::from_f64(value)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

// ============================================================================
// Response
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub text: String,
    pub index: u32,
    /// Always null; logprobs are not computed by the gateway.
    pub logprobs: Option<serde_json::Value>,
    pub finish_reason: Option<FinishReason>,
}

impl CompletionChoice {
    pub fn new(text: impl Into<String>, finish_reason: Option<FinishReason>) -> Self {
        Self {
            text: text.into(),
            index: 0,
            logprobs: None,
            finish_reason,
        }
    }
}

/// Completions object, also used for each streaming frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Completion {
    pub fn new(
        job_id: impl std::fmt::Display,
        created: i64,
        model: impl Into<String>,
        choices: Vec<CompletionChoice>,
        usage: Option<Usage>,
    ) -> Self {
        Self {
            id: format!("cmpl-{}", job_id),
            object: "text_completion".to_string(),
            created,
            model: model.into(),
            choices,
            usage,
        }
    }
}

// ============================================================================
// Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelEntry>,
}

impl ModelList {
    /// Build the `/v1/models` listing: sorted lexicographically by name, with
    /// `created` taken from the model's modification timestamp.
    pub fn from_descriptors(descriptors: &[ModelDescriptor], owned_by: &str) -> Self {
        let mut data: Vec<ModelEntry> = descriptors
            .iter()
            .map(|descriptor| ModelEntry {
                id: descriptor.name.clone(),
                object: "model".to_string(),
                created: descriptor.modified_at.timestamp(),
                owned_by: owned_by.to_string(),
            })
            .collect();
        data.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            object: "list".to_string(),
            data,
        }
    }
}
