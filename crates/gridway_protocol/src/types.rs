//! Canonical scheduler vocabulary (ids, worker state, request shapes).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// Canonical Ids
// ============================================================================

/// Canonical job identifier, assigned by the gateway at submission.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord, Default,
)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for JobId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<JobId> for u64 {
    fn from(value: JobId) -> Self {
        value.0
    }
}

/// Stable opaque worker identifier, chosen by the worker at registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for WorkerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Session token returned by registration and required on every heartbeat.
/// Rotates on each re-registration so a superseded worker process cannot
/// keep a dead session alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(Uuid);

impl SessionToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Worker State (Canonical Definition)
// ============================================================================

/// Worker liveness state. This is the CANONICAL definition - the Registry is
/// the only writer; everything else reads snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    /// Registered but no heartbeat acknowledged yet
    #[default]
    Joining,
    /// Healthy; new assignments permitted
    Ready,
    /// Finishing in-flight jobs; no new assignments
    Draining,
    /// Heartbeat overdue beyond the liveness threshold
    Lost,
}

impl Liveness {
    pub const ALL: &'static [Liveness] = &[
        Liveness::Joining,
        Liveness::Ready,
        Liveness::Draining,
        Liveness::Lost,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Liveness::Joining => "joining",
            Liveness::Ready => "ready",
            Liveness::Draining => "draining",
            Liveness::Lost => "lost",
        }
    }

    /// Only `ready` workers receive new assignments.
    pub fn accepts_assignments(&self) -> bool {
        matches!(self, Liveness::Ready)
    }

    /// In-flight jobs remain valid while the worker is ready or draining.
    pub fn holds_jobs(&self) -> bool {
        matches!(self, Liveness::Ready | Liveness::Draining)
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Liveness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "joining" => Ok(Liveness::Joining),
            "ready" => Ok(Liveness::Ready),
            "draining" => Ok(Liveness::Draining),
            "lost" => Ok(Liveness::Lost),
            _ => Err(format!("Invalid liveness state: '{}'", s)),
        }
    }
}

/// One model a worker advertises. Two descriptors with the same name from
/// different workers are the same model for availability purposes; the newest
/// `modified_at` wins for externally reported metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub modified_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
}

/// Capabilities reported at registration and replaced atomically on
/// re-registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerCapabilities {
    pub models: Vec<ModelDescriptor>,
    pub max_concurrency: u32,
    pub supports_streaming: bool,
}

impl WorkerCapabilities {
    pub fn has_model(&self, name: &str) -> bool {
        self.models.iter().any(|m| m.name == name)
    }
}

/// Load observed by the worker itself, piggybacked on heartbeats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSnapshot {
    pub in_flight: u32,
}

// ============================================================================
// Request Model
// ============================================================================

/// Request priority. Ordering is Low < Medium < High so the queue can sort
/// buckets directly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    /// Highest first, for dispatch scans.
    pub const DESCENDING: &'static [Priority] = &[Priority::High, Priority::Medium, Priority::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            _ => Err(format!(
                "Invalid priority: '{}'. Expected: low, medium, or high",
                s
            )),
        }
    }
}

/// Which wire flavor produced a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Native,
    OpenAi,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Native => "native",
            Protocol::OpenAi => "openai",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One chat turn in the native flavor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

/// Embedding input: a single text or a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbedInput {
    Single(String),
    Batch(Vec<String>),
}

/// The exactly-one payload shape of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RequestPayload {
    Generate { prompt: String },
    Chat { messages: Vec<ChatMessage> },
    Embed { input: EmbedInput },
}

impl RequestPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            RequestPayload::Generate { .. } => "generate",
            RequestPayload::Chat { .. } => "chat",
            RequestPayload::Embed { .. } => "embed",
        }
    }

    /// Embeddings never stream.
    pub fn supports_streaming(&self) -> bool {
        !matches!(self, RequestPayload::Embed { .. })
    }
}

/// Worker-bound fields the gateway forwards without interpreting. Each field
/// is serialized only when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassthroughOptions {
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

impl PassthroughOptions {
    pub fn is_empty(&self) -> bool {
        self == &PassthroughOptions::default()
    }
}

/// Opaque generation options forwarded to the worker verbatim
/// (temperature, num_predict, seed, stop, ...).
pub type GenerationOptions = serde_json::Map<String, serde_json::Value>;

/// Submission metadata recorded for every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub protocol: Protocol,
}

impl SubmissionMeta {
    pub fn now(protocol: Protocol) -> Self {
        Self {
            client_ip: None,
            user_agent: None,
            submitted_at: Utc::now(),
            protocol,
        }
    }
}

/// A validated inference request, ready for the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub model: String,
    pub payload: RequestPayload,
    #[serde(default, skip_serializing_if = "GenerationOptions::is_empty")]
    pub options: GenerationOptions,
    #[serde(default, skip_serializing_if = "PassthroughOptions::is_empty")]
    pub passthrough: PassthroughOptions,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub stream: bool,
    /// Relative budget; the scheduler turns this into an absolute deadline at
    /// enqueue, falling back to the configured default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    pub meta: SubmissionMeta,
}
