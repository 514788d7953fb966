//! Dispatcher - matches queued jobs to ready workers and supervises them.
//!
//! Design notes:
//! - The in-flight table and the registry's per-worker slot counters move
//!   together: every insert happens under the table lock right after a
//!   successful slot acquisition, every removal releases the slot before the
//!   lock drops.
//! - Each assignment runs as its own task. Removing a job's table entry
//!   drops a watch sender the task selects on, so cancel and worker-lost
//!   paths wake the task promptly instead of aborting it mid-await.
//! - A job id can be re-assigned after a retry, so task-side cleanup is
//!   guarded by an assignment epoch; a stale task cannot touch the entry of
//!   a newer assignment.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant as StdInstant;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use gridway_protocol::config::SchedulerConfig;
use gridway_protocol::wire::{derive_finish_reason, DispatchBody, WorkerRecord};
use gridway_protocol::{InferenceRequest, JobId, WorkerId};

use crate::adapter::{AdapterError, WorkerAdapter};
use crate::broker::{PipeOutcome, StreamBroker};
use crate::error::JobError;
use crate::queue::{JobQueue, QueuedJob};
use crate::registry::Registry;
use crate::sink::{self, Completion, JobHandle, JobSink, TokenUsage};

const PHASE_ASSIGNED: u8 = 0;
const PHASE_RUNNING: u8 = 1;

/// Phase of an assigned job, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Assigned,
    Running,
}

/// One row of the in-flight table.
struct InFlight {
    worker: WorkerId,
    address: String,
    request: InferenceRequest,
    sink: JobSink,
    queued_at: StdInstant,
    deadline: StdInstant,
    attempt: u32,
    epoch: u64,
    phase: Arc<AtomicU8>,
    // Dropped on removal; wakes the assignment task.
    _removed: watch::Sender<bool>,
}

/// Observability snapshot of one in-flight job.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InFlightSnapshot {
    pub job_id: JobId,
    pub worker: WorkerId,
    pub phase: JobPhase,
    pub attempt: u32,
}

/// The matching engine. Owns the in-flight table; consumes the queue;
/// reads and mutates worker slots through the registry.
pub struct Dispatcher {
    registry: Arc<Registry>,
    queue: Arc<JobQueue>,
    broker: Arc<StreamBroker>,
    adapter: Arc<dyn WorkerAdapter>,
    inflight: Mutex<HashMap<JobId, InFlight>>,
    next_job_id: AtomicU64,
    next_epoch: AtomicU64,
    config: SchedulerConfig,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        queue: Arc<JobQueue>,
        broker: Arc<StreamBroker>,
        adapter: Arc<dyn WorkerAdapter>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            queue,
            broker,
            adapter,
            inflight: Mutex::new(HashMap::new()),
            next_job_id: AtomicU64::new(1),
            next_epoch: AtomicU64::new(1),
            config,
        }
    }

    /// Submit a non-streaming request. Returns after the first dispatch
    /// attempt; the handle resolves with the aggregated response.
    pub fn submit(self: &Arc<Self>, mut request: InferenceRequest) -> Result<JobHandle, JobError> {
        request.stream = false;
        self.submit_inner(request)
    }

    /// Submit a streaming request. Returns after the first dispatch attempt;
    /// chunks and the terminal event arrive through the handle.
    pub fn submit_streaming(
        self: &Arc<Self>,
        mut request: InferenceRequest,
    ) -> Result<JobHandle, JobError> {
        request.stream = true;
        self.submit_inner(request)
    }

    fn submit_inner(self: &Arc<Self>, request: InferenceRequest) -> Result<JobHandle, JobError> {
        if !self.registry.has_ready_model(&request.model) {
            return Err(JobError::ModelUnavailable {
                model: request.model,
            });
        }

        let job_id = JobId::new(self.next_job_id.fetch_add(1, Ordering::Relaxed));
        let (job_sink, handle) = sink::channel(job_id);
        let now = StdInstant::now();
        let deadline = now + request.timeout.unwrap_or(self.config.request_timeout);

        debug!(
            "Submitting job {} for model '{}' ({}, {})",
            job_id,
            request.model,
            request.payload.kind(),
            request.priority
        );

        let job = QueuedJob {
            id: job_id,
            request,
            queued_at: now,
            deadline,
            attempt: 1,
            sink: job_sink,
        };
        if self.queue.enqueue(job).is_err() {
            return Err(JobError::QueueFull {
                limit: self.queue.depth_limit(),
            });
        }

        self.pump();
        Ok(handle)
    }

    /// Match queued jobs to workers until nothing further can be placed.
    /// Called after every event that may open capacity: submission,
    /// completion, heartbeat promotion, worker loss.
    pub fn pump(self: &Arc<Self>) {
        loop {
            let registry = Arc::clone(&self.registry);
            let (job, expired) = self
                .queue
                .take_matching(StdInstant::now(), |model| registry.is_dispatchable(model));

            for job in expired {
                warn!("Job {} expired in queue", job.id);
                job.sink.fail(JobError::DeadlineExpired);
            }

            let Some(job) = job else { break };
            if !self.assign(job) {
                break;
            }
        }
    }

    /// Assign one job: pick the best candidate with a free slot, pair the
    /// slot acquisition with the in-flight insert, and spawn the job task.
    /// Returns false when no candidate had capacity (the job went back to
    /// the head of its bucket).
    fn assign(self: &Arc<Self>, job: QueuedJob) -> bool {
        let candidates = self.registry.candidates(&job.request.model);

        let mut inflight = self.inflight.lock().unwrap();
        for worker in candidates {
            if job.request.stream && !self.registry.supports_streaming(&worker) {
                continue;
            }
            if !self.registry.try_acquire_slot(&worker) {
                continue;
            }
            let Some(address) = self.registry.address_of(&worker) else {
                self.registry.release_slot(&worker);
                continue;
            };

            let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
            let phase = Arc::new(AtomicU8::new(PHASE_ASSIGNED));
            let (removed_tx, removed_rx) = watch::channel(false);
            let streaming = job.request.stream;

            info!(
                "Assigning job {} to worker [{}] (attempt {})",
                job.id, worker, job.attempt
            );
            inflight.insert(
                job.id,
                InFlight {
                    worker: worker.clone(),
                    address: address.clone(),
                    request: job.request.clone(),
                    sink: job.sink.clone(),
                    queued_at: job.queued_at,
                    deadline: job.deadline,
                    attempt: job.attempt,
                    epoch,
                    phase: Arc::clone(&phase),
                    _removed: removed_tx,
                },
            );
            drop(inflight);

            let this = Arc::clone(self);
            let task = JobTask {
                job_id: job.id,
                request: job.request,
                sink: job.sink,
                address,
                deadline: job.deadline,
                epoch,
                streaming,
                phase,
            };
            tokio::spawn(async move { this.run_job(task, removed_rx).await });
            return true;
        }
        drop(inflight);

        debug!(
            "No capacity for job {} (model '{}'), returning to bucket head",
            job.id, job.request.model
        );
        self.queue.requeue_front(job);
        false
    }

    /// Cancel a job at any state. Queued jobs are removed without contacting
    /// a worker; in-flight jobs are detached and the worker receives a
    /// best-effort cancel signal. The client-visible stream terminates
    /// immediately with `Cancelled`.
    pub fn cancel(self: &Arc<Self>, job_id: JobId) -> bool {
        if let Some(job) = self.queue.cancel(job_id) {
            info!("Cancelled queued job {}", job_id);
            job.sink.fail(JobError::Cancelled);
            return true;
        }

        let Some(entry) = self.remove_entry(job_id, None) else {
            return false;
        };
        info!("Cancelling job {} on worker [{}]", job_id, entry.worker);
        self.broker.detach(job_id);
        entry.sink.fail(JobError::Cancelled);
        self.spawn_cancel(&entry.address, job_id);
        self.pump();
        true
    }

    /// Invoked by the liveness sweep: fail or retry every in-flight job
    /// assigned to a worker that was declared lost.
    pub fn notify_worker_lost(self: &Arc<Self>, worker: &WorkerId) {
        let orphaned: Vec<JobId> = {
            let inflight = self.inflight.lock().unwrap();
            inflight
                .iter()
                .filter(|(_, entry)| entry.worker == *worker)
                .map(|(job_id, _)| *job_id)
                .collect()
        };

        for job_id in orphaned {
            warn!("Job {} orphaned by lost worker [{}]", job_id, worker);
            self.broker.detach(job_id);
            self.fail_or_retry(
                job_id,
                None,
                JobError::WorkerLost {
                    worker: worker.clone(),
                },
            );
        }
    }

    /// Snapshot of the in-flight table.
    pub fn inflight_snapshot(&self) -> Vec<InFlightSnapshot> {
        let inflight = self.inflight.lock().unwrap();
        let mut rows: Vec<InFlightSnapshot> = inflight
            .iter()
            .map(|(job_id, entry)| InFlightSnapshot {
                job_id: *job_id,
                worker: entry.worker.clone(),
                phase: if entry.phase.load(Ordering::SeqCst) == PHASE_RUNNING {
                    JobPhase::Running
                } else {
                    JobPhase::Assigned
                },
                attempt: entry.attempt,
            })
            .collect();
        rows.sort_by_key(|row| row.job_id);
        rows
    }

    /// Fail all queued and in-flight jobs. Teardown path.
    pub fn drain_all(self: &Arc<Self>) {
        for job in self.queue.drain_all() {
            job.sink.fail(JobError::Cancelled);
        }
        let job_ids: Vec<JobId> = {
            let inflight = self.inflight.lock().unwrap();
            inflight.keys().copied().collect()
        };
        for job_id in job_ids {
            self.cancel(job_id);
        }
    }

    // ------------------------------------------------------------------
    // Assignment task
    // ------------------------------------------------------------------

    async fn run_job(self: Arc<Self>, task: JobTask, mut removed_rx: watch::Receiver<bool>) {
        let deadline = Instant::from_std(task.deadline);
        let body = DispatchBody::from_request(&task.request, task.streaming);

        if task.streaming {
            let source = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    self.spawn_cancel(&task.address, task.job_id);
                    self.conclude(task.job_id, Some(task.epoch), Err(JobError::DeadlineExpired));
                    return;
                }
                _ = removed_rx.changed() => return,
                result = self.adapter.dispatch_streaming(&task.address, body) => match result {
                    Ok(source) => source,
                    Err(e) => {
                        self.dispatch_failed(task.job_id, task.epoch, e);
                        return;
                    }
                }
            };
            task.phase.store(PHASE_RUNNING, Ordering::SeqCst);

            match self.broker.pipe(task.job_id, source, &task.sink, deadline).await {
                PipeOutcome::Completed(completion) => {
                    debug!("Job {} streamed to completion", task.job_id);
                    self.conclude(task.job_id, Some(task.epoch), Ok(completion));
                }
                PipeOutcome::Failed(JobError::DeadlineExpired) => {
                    self.spawn_cancel(&task.address, task.job_id);
                    self.conclude(task.job_id, Some(task.epoch), Err(JobError::DeadlineExpired));
                }
                PipeOutcome::Failed(error) => {
                    self.fail_or_retry(task.job_id, Some(task.epoch), error);
                }
                PipeOutcome::Detached => {
                    // Cancelled, superseded, or the client went away. Whoever
                    // detached already owns terminal delivery; if nobody does
                    // (client disconnect), Cancelled is recorded on a sink no
                    // one is reading.
                    self.spawn_cancel(&task.address, task.job_id);
                    self.conclude(task.job_id, Some(task.epoch), Err(JobError::Cancelled));
                }
            }
        } else {
            // Non-streaming jobs are running as soon as the dispatch call is
            // issued; there is no first-chunk boundary.
            task.phase.store(PHASE_RUNNING, Ordering::SeqCst);
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    self.spawn_cancel(&task.address, task.job_id);
                    self.conclude(task.job_id, Some(task.epoch), Err(JobError::DeadlineExpired));
                }
                _ = removed_rx.changed() => {}
                result = self.adapter.dispatch(&task.address, body) => match result {
                    Ok(record) => {
                        let outcome = aggregate_outcome(record);
                        match outcome {
                            Ok(completion) => {
                                self.conclude(task.job_id, Some(task.epoch), Ok(completion))
                            }
                            Err(error) => {
                                self.conclude(task.job_id, Some(task.epoch), Err(error))
                            }
                        }
                    }
                    Err(e) => self.dispatch_failed(task.job_id, task.epoch, e),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Bookkeeping
    // ------------------------------------------------------------------

    /// Remove an in-flight entry, releasing its worker slot in the same
    /// critical section. With an epoch, removal only happens when the entry
    /// still belongs to that assignment.
    fn remove_entry(&self, job_id: JobId, epoch: Option<u64>) -> Option<InFlight> {
        let mut inflight = self.inflight.lock().unwrap();
        if let Some(expected) = epoch {
            if inflight.get(&job_id).map(|entry| entry.epoch) != Some(expected) {
                return None;
            }
        }
        let entry = inflight.remove(&job_id);
        if let Some(entry) = &entry {
            self.registry.release_slot(&entry.worker);
        }
        entry
    }

    /// Terminal bookkeeping for an assignment: remove the entry, deliver the
    /// outcome (no-op when a terminal event already went out), free capacity.
    fn conclude(
        self: &Arc<Self>,
        job_id: JobId,
        epoch: Option<u64>,
        outcome: Result<Completion, JobError>,
    ) {
        let Some(entry) = self.remove_entry(job_id, epoch) else {
            return;
        };
        match outcome {
            Ok(completion) => {
                entry.sink.complete(completion);
            }
            Err(error) => {
                info!("Job {} failed: {}", job_id, error);
                entry.sink.fail(error);
            }
        }
        self.pump();
    }

    /// Classify an adapter failure and route it through the retry policy.
    fn dispatch_failed(self: &Arc<Self>, job_id: JobId, epoch: u64, error: AdapterError) {
        let job_error = if error.is_transport() {
            // The worker cannot be reached; from the job's perspective this
            // is the same as losing it.
            let worker = {
                let inflight = self.inflight.lock().unwrap();
                inflight.get(&job_id).map(|entry| entry.worker.clone())
            };
            match worker {
                Some(worker) => JobError::WorkerLost { worker },
                None => return, // entry already handled elsewhere
            }
        } else {
            match &error {
                AdapterError::Decode(detail) => JobError::TransportCorrupt {
                    detail: detail.clone(),
                },
                _ => JobError::WorkerReported {
                    message: error.to_string(),
                },
            }
        };
        self.fail_or_retry(job_id, Some(epoch), job_error);
    }

    /// Apply the retry policy: a lost worker before any client-visible
    /// output re-enqueues the job at the head of its bucket, up to
    /// `max_attempts` total attempts. Everything else is final.
    fn fail_or_retry(self: &Arc<Self>, job_id: JobId, epoch: Option<u64>, error: JobError) {
        let Some(entry) = self.remove_entry(job_id, epoch) else {
            return;
        };

        let retryable = error.is_retryable()
            && !entry.sink.has_emitted()
            && entry.attempt < self.config.max_attempts;

        if retryable {
            info!(
                "Retrying job {} after '{}' (attempt {} of {})",
                job_id,
                error,
                entry.attempt + 1,
                self.config.max_attempts
            );
            self.queue.requeue_front(QueuedJob {
                id: job_id,
                request: entry.request,
                queued_at: entry.queued_at,
                deadline: entry.deadline,
                attempt: entry.attempt + 1,
                sink: entry.sink,
            });
        } else {
            info!("Job {} failed: {}", job_id, error);
            entry.sink.fail(error);
        }
        self.pump();
    }

    /// Fire the best-effort worker cancel signal, bounded by `cancel_grace`.
    fn spawn_cancel(&self, address: &str, job_id: JobId) {
        let adapter = Arc::clone(&self.adapter);
        let address = address.to_string();
        let grace = self.config.cancel_grace;
        tokio::spawn(async move {
            let sent = tokio::time::timeout(grace, adapter.cancel(&address, job_id)).await;
            if sent.is_err() {
                debug!("Cancel signal for job {} timed out", job_id);
            }
        });
    }
}

/// Everything a job task needs, detached from the table entry.
struct JobTask {
    job_id: JobId,
    request: InferenceRequest,
    sink: JobSink,
    address: String,
    deadline: StdInstant,
    epoch: u64,
    streaming: bool,
    phase: Arc<AtomicU8>,
}

/// Turn a non-streaming worker record into a completion.
fn aggregate_outcome(mut record: WorkerRecord) -> Result<Completion, JobError> {
    if let Some(message) = record.error.take() {
        return Err(JobError::WorkerReported { message });
    }
    let usage = match (record.prompt_eval_count, record.eval_count) {
        (None, None) => None,
        (prompt, completion) => Some(TokenUsage {
            prompt_tokens: prompt.unwrap_or(0),
            completion_tokens: completion.unwrap_or(0),
        }),
    };
    Ok(Completion {
        text: record.response.clone().or_else(|| {
            record
                .message
                .as_ref()
                .and_then(|message| message.content.clone())
        }),
        embeddings: record.embedding_vectors(),
        finish_reason: derive_finish_reason(record.done_reason.as_deref(), record.eval_count),
        usage,
        total_duration: record.total_duration,
    })
}
