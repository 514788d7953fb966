//! Per-job event delivery.
//!
//! A job's client side observes a stream of tagged events: any number of
//! `Chunk`s followed by exactly one `Complete` or `Error`. The sink end is
//! held by the scheduler and enforces the terminal-exactly-once contract; the
//! handle end fuses after the terminal event so no chunk can be observed
//! after it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use gridway_protocol::{wire::FinishReason, JobId};

use crate::error::JobError;

/// Token accounting reported on the terminal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Terminal outcome of a successful job.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Completion {
    /// Aggregated text for non-streaming jobs; `None` on streaming terminals
    /// (the text already went out as chunks).
    pub text: Option<String>,
    /// Embedding vectors for embed jobs.
    pub embeddings: Option<Vec<Vec<f32>>>,
    pub finish_reason: FinishReason,
    pub usage: Option<TokenUsage>,
    /// Nanoseconds, as reported by the worker runtime.
    pub total_duration: Option<u64>,
}

/// One event observed by the client side of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// Incremental text delta, in worker-emission order.
    Chunk(String),
    /// Terminal: the job finished on the worker.
    Complete(Completion),
    /// Terminal: the job failed or was cancelled.
    Error(JobError),
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobEvent::Chunk(_))
    }
}

struct SinkShared {
    tx: mpsc::UnboundedSender<JobEvent>,
    terminal: AtomicBool,
    emitted: AtomicBool,
}

/// Scheduler-side end of a job's event channel. Cloneable; all clones share
/// the terminal-exactly-once state.
#[derive(Clone)]
pub struct JobSink {
    shared: Arc<SinkShared>,
}

impl JobSink {
    /// Forward a text delta. Returns false when the event was not delivered,
    /// either because a terminal event already went out or because the client
    /// side is gone.
    pub fn chunk(&self, text: String) -> bool {
        if self.shared.terminal.load(Ordering::SeqCst) {
            return false;
        }
        self.shared.emitted.store(true, Ordering::SeqCst);
        self.shared.tx.send(JobEvent::Chunk(text)).is_ok()
    }

    /// Deliver the successful terminal event. Returns false if a terminal
    /// event was already delivered.
    pub fn complete(&self, completion: Completion) -> bool {
        if self.shared.terminal.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.shared.tx.send(JobEvent::Complete(completion)).is_ok()
    }

    /// Deliver the failure terminal event. Returns false if a terminal event
    /// was already delivered.
    pub fn fail(&self, error: JobError) -> bool {
        if self.shared.terminal.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.shared.tx.send(JobEvent::Error(error)).is_ok()
    }

    /// Whether any chunk has been forwarded to the client. Gates the retry
    /// policy: once output reached the client, a lost worker is final.
    pub fn has_emitted(&self) -> bool {
        self.shared.emitted.load(Ordering::SeqCst)
    }

    pub fn is_terminal(&self) -> bool {
        self.shared.terminal.load(Ordering::SeqCst)
    }

    /// Whether the client side dropped its handle.
    pub fn is_closed(&self) -> bool {
        self.shared.tx.is_closed()
    }
}

/// Client-side end of a job's event channel.
#[derive(Debug)]
pub struct JobHandle {
    job_id: JobId,
    rx: mpsc::UnboundedReceiver<JobEvent>,
    finished: bool,
}

impl JobHandle {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Next event, in delivery order. Returns `None` after the terminal event
    /// (or if the scheduler was torn down before delivering one); no chunk is
    /// ever yielded after a terminal event.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        if self.finished {
            return None;
        }
        let event = self.rx.recv().await?;
        if event.is_terminal() {
            self.finished = true;
            self.rx.close();
        }
        Some(event)
    }

    /// Drain the stream into a single aggregated result. Chunks are
    /// concatenated into `Completion::text` when the terminal carries none.
    pub async fn into_result(mut self) -> Result<Completion, JobError> {
        let mut collected = String::new();
        while let Some(event) = self.next_event().await {
            match event {
                JobEvent::Chunk(text) => collected.push_str(&text),
                JobEvent::Complete(mut completion) => {
                    if completion.text.is_none() && !collected.is_empty() {
                        completion.text = Some(collected);
                    }
                    return Ok(completion);
                }
                JobEvent::Error(error) => return Err(error),
            }
        }
        // Channel closed without a terminal event: the scheduler went away.
        Err(JobError::Cancelled)
    }
}

/// Create the linked sink/handle pair for a job.
pub fn channel(job_id: JobId) -> (JobSink, JobHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = JobSink {
        shared: Arc::new(SinkShared {
            tx,
            terminal: AtomicBool::new(false),
            emitted: AtomicBool::new(false),
        }),
    };
    let handle = JobHandle {
        job_id,
        rx,
        finished: false,
    };
    (sink, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion() -> Completion {
        Completion {
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

    #[tokio::test]
    async fn test_chunks_then_terminal_in_order() {
        let (sink, mut handle) = channel(JobId::new(1));
        assert!(sink.chunk("He".to_string()));
        assert!(sink.chunk("llo".to_string()));
        assert!(sink.complete(completion()));

        assert_eq!(
            handle.next_event().await,
            Some(JobEvent::Chunk("He".to_string()))
        );
        assert_eq!(
            handle.next_event().await,
            Some(JobEvent::Chunk("llo".to_string()))
        );
        assert!(matches!(
            handle.next_event().await,
            Some(JobEvent::Complete(_))
        ));
        assert_eq!(handle.next_event().await, None);
    }

    #[tokio::test]
    async fn test_terminal_exactly_once() {
        let (sink, mut handle) = channel(JobId::new(2));
        assert!(sink.complete(completion()));
        assert!(!sink.fail(JobError::Cancelled));
        assert!(!sink.complete(completion()));

        assert!(matches!(
            handle.next_event().await,
            Some(JobEvent::Complete(_))
        ));
        assert_eq!(handle.next_event().await, None);
    }

    #[tokio::test]
    async fn test_no_chunk_after_terminal() {
        let (sink, mut handle) = channel(JobId::new(3));
        assert!(sink.fail(JobError::DeadlineExpired));
        assert!(!sink.chunk("late".to_string()));

        assert!(matches!(handle.next_event().await, Some(JobEvent::Error(_))));
        assert_eq!(handle.next_event().await, None);
    }

    #[tokio::test]
    async fn test_emitted_flag_tracks_first_chunk() {
        let (sink, _handle) = channel(JobId::new(4));
        assert!(!sink.has_emitted());
        sink.chunk("x".to_string());
        assert!(sink.has_emitted());
    }

    #[tokio::test]
    async fn test_into_result_aggregates_chunks() {
        let (sink, handle) = channel(JobId::new(5));
        sink.chunk("Hi ".to_string());
        sink.chunk("there".to_string());
        sink.complete(completion());

        let result = handle.into_result().await.unwrap();
        assert_eq!(result.text.as_deref(), Some("Hi there"));
        assert_eq!(result.usage.unwrap().total(), 3);
    }

    #[tokio::test]
    async fn test_closed_handle_detected() {
        let (sink, handle) = channel(JobId::new(6));
        drop(handle);
        assert!(sink.is_closed());
        assert!(!sink.chunk("x".to_string()));
    }
}
