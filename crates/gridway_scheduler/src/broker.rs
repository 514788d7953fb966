//! Stream Broker - per-job conduit between worker stream and client sink.
//!
//! Reassembles newline-delimited records from the worker's byte stream,
//! forwards text deltas in arrival order, and turns the terminal record into
//! exactly one `Complete` (or `Error`). A binding can be detached at any
//! point - by cancellation or client disconnect - after which pending
//! forwards are dropped and the worker-side stream is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use gridway_protocol::wire::{derive_finish_reason, WorkerRecord};
use gridway_protocol::JobId;

use crate::adapter::ChunkSource;
use crate::error::JobError;
use crate::sink::{Completion, JobSink, TokenUsage};

/// How a pipe ended.
#[derive(Debug)]
pub enum PipeOutcome {
    /// Terminal record observed; the completion was delivered to the sink.
    Completed(Completion),
    /// The stream failed; the error has NOT been delivered yet.
    Failed(JobError),
    /// Detached by cancellation or client disconnect; no terminal was
    /// delivered from here.
    Detached,
}

struct Binding {
    detach: watch::Sender<bool>,
    /// A retried job re-attaches under the same job id; the tag keeps a
    /// stale pipe's cleanup from removing its successor's binding.
    tag: u64,
}

/// Registry of active stream bindings, keyed by job id.
pub struct StreamBroker {
    bindings: Mutex<HashMap<JobId, Binding>>,
    next_tag: AtomicU64,
}

impl StreamBroker {
    pub fn new() -> Self {
        Self {
            bindings: Mutex::new(HashMap::new()),
            next_tag: AtomicU64::new(1),
        }
    }

    /// Register a binding for `job_id` and return its detach signal.
    fn attach(&self, job_id: JobId) -> (watch::Receiver<bool>, u64) {
        let (tx, rx) = watch::channel(false);
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        self.bindings
            .lock()
            .unwrap()
            .insert(job_id, Binding { detach: tx, tag });
        (rx, tag)
    }

    /// Sever the binding for `job_id`. Outstanding chunks are discarded and
    /// the pipe drops the worker-side stream. Returns false when no binding
    /// exists (already finished or never attached).
    pub fn detach(&self, job_id: JobId) -> bool {
        let binding = self.bindings.lock().unwrap().remove(&job_id);
        match binding {
            Some(binding) => {
                debug!("Detached stream for job {}", job_id);
                let _ = binding.detach.send(true);
                true
            }
            None => false,
        }
    }

    fn release(&self, job_id: JobId, tag: u64) {
        let mut bindings = self.bindings.lock().unwrap();
        if bindings.get(&job_id).map(|binding| binding.tag) == Some(tag) {
            bindings.remove(&job_id);
        }
    }

    /// Drive a worker stream to its end, forwarding chunks to the sink.
    ///
    /// On `Completed` the terminal event has already been delivered through
    /// the sink; `Failed` leaves delivery to the caller so it can apply the
    /// retry policy first.
    pub async fn pipe(
        &self,
        job_id: JobId,
        mut source: ChunkSource,
        sink: &JobSink,
        deadline: Instant,
    ) -> PipeOutcome {
        let (mut detach_rx, tag) = self.attach(job_id);
        let mut buffer: Vec<u8> = Vec::new();

        let outcome = loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    break PipeOutcome::Failed(JobError::DeadlineExpired);
                }
                changed = detach_rx.changed() => {
                    match changed {
                        Ok(()) if *detach_rx.borrow() => break PipeOutcome::Detached,
                        Ok(()) => continue,
                        // Sender gone: treat as detached.
                        Err(_) => break PipeOutcome::Detached,
                    }
                }
                item = source.next() => {
                    match item {
                        None => {
                            let detail = if buffer.iter().any(|b| !b.is_ascii_whitespace()) {
                                "stream closed mid-record"
                            } else {
                                "stream closed before terminal record"
                            };
                            break PipeOutcome::Failed(JobError::TransportCorrupt {
                                detail: detail.to_string(),
                            });
                        }
                        Some(Err(e)) => {
                            break PipeOutcome::Failed(JobError::TransportCorrupt {
                                detail: e.to_string(),
                            });
                        }
                        Some(Ok(bytes)) => {
                            buffer.extend_from_slice(&bytes);
                            if let Some(outcome) = self.drain_records(job_id, &mut buffer, sink) {
                                break outcome;
                            }
                        }
                    }
                }
            }
        };

        self.release(job_id, tag);
        outcome
    }

    /// Parse every complete line currently buffered. Returns an outcome when
    /// the stream reached a terminal condition.
    fn drain_records(
        &self,
        job_id: JobId,
        buffer: &mut Vec<u8>,
        sink: &JobSink,
    ) -> Option<PipeOutcome> {
        while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=newline).collect();
            let line = &line[..line.len() - 1];
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }

            let mut record: WorkerRecord = match serde_json::from_slice(line) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping unparseable record on job {}: {}", job_id, e);
                    continue;
                }
            };

            if let Some(message) = record.error.take() {
                return Some(PipeOutcome::Failed(JobError::WorkerReported { message }));
            }

            if let Some(delta) = record.text_delta() {
                if !delta.is_empty() && !sink.chunk(delta.to_string()) {
                    // Client side is gone; stop pulling from the worker.
                    return Some(PipeOutcome::Detached);
                }
            }

            if record.done {
                let usage = match (record.prompt_eval_count, record.eval_count) {
                    (None, None) => None,
                    (prompt, completion) => Some(TokenUsage {
                        prompt_tokens: prompt.unwrap_or(0),
                        completion_tokens: completion.unwrap_or(0),
                    }),
                };
                let completion = Completion {
                    text: None,
                    embeddings: None,
                    finish_reason: derive_finish_reason(
                        record.done_reason.as_deref(),
                        record.eval_count,
                    ),
                    usage,
                    total_duration: record.total_duration,
                };
                sink.complete(completion.clone());
                return Some(PipeOutcome::Completed(completion));
            }
        }
        None
    }
}

impl Default for StreamBroker {
    fn default() -> Self {
        Self::new()
    }
}
