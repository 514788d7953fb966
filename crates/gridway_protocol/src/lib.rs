//! Shared protocol types for the Gridway gateway.
//!
//! Three surfaces meet here:
//!
//! - The **native worker wire protocol** (`wire`): JSON POST bodies sent to a
//!   worker's inference runtime and the newline-delimited JSON records it
//!   streams back.
//! - The **OpenAI-compatible client surface** (`openai`): `/v1/completions`
//!   and `/v1/models` request/response objects plus the parameter translation
//!   table into native generation options.
//! - The **scheduler vocabulary** (`types`): worker identities, capabilities,
//!   liveness states, request payloads, and priorities shared by the gateway,
//!   the scheduler core, and the worker agent.
//!
//! All types serialize with serde; nothing in this crate performs I/O.

pub mod config;
pub mod control;
pub mod defaults;
pub mod error;
pub mod openai;
pub mod types;
pub mod wire;

// Re-export the canonical vocabulary for convenience
pub use types::{
    ChatMessage,
    EmbedInput,
    GenerationOptions,
    InferenceRequest,
    JobId,
    Liveness,
    LoadSnapshot,
    ModelDescriptor,
    PassthroughOptions,
    Priority,
    Protocol,
    RequestPayload,
    SessionToken,
    SubmissionMeta,
    WorkerCapabilities,
    WorkerId,
};

pub use error::{ApiError, ErrorEnvelope};
pub use wire::{derive_finish_reason, DispatchBody, FinishReason, WorkerRecord};
