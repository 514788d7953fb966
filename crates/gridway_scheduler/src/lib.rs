//! Gridway scheduler core.
//!
//! Four cooperating components, leaves first: the worker `registry`, the
//! priority `queue`, the `dispatcher` matching engine, and the stream
//! `broker`. The `Scheduler` aggregate wires them together with a background
//! sweep for liveness and queued-job deadlines; the HTTP surface receives an
//! injected `Scheduler` and holds no state of its own.

pub mod adapter;
pub mod broker;
pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod registry;
pub mod sink;

pub use adapter::{AdapterError, ChunkSource, HttpWorkerAdapter, WorkerAdapter};
pub use broker::{PipeOutcome, StreamBroker};
pub use dispatcher::{Dispatcher, InFlightSnapshot, JobPhase};
pub use error::{JobError, RegistryError};
pub use queue::{JobQueue, QueueDepths, QueuedJob};
pub use registry::{Registry, WorkerSnapshot};
pub use sink::{Completion, JobEvent, JobHandle, JobSink, TokenUsage};

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use gridway_protocol::config::SchedulerConfig;
use gridway_protocol::{
    InferenceRequest, JobId, LoadSnapshot, ModelDescriptor, SessionToken, WorkerCapabilities,
    WorkerId,
};

/// Cadence of the background liveness/deadline sweep.
const SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// The scheduler instance: registry + queue + dispatcher + broker plus the
/// background sweep. Construct with [`Scheduler::new`] inside a tokio
/// runtime; tear down with [`Scheduler::shutdown`].
pub struct Scheduler {
    registry: Arc<Registry>,
    queue: Arc<JobQueue>,
    dispatcher: Arc<Dispatcher>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, adapter: Arc<dyn WorkerAdapter>) -> Arc<Self> {
        let registry = Arc::new(Registry::new(config.liveness_threshold));
        let queue = Arc::new(JobQueue::new(config.queue_depth_limit));
        let broker = Arc::new(StreamBroker::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&queue),
            broker,
            adapter,
            config,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = tokio::spawn(sweep_loop(
            Arc::clone(&registry),
            Arc::clone(&queue),
            Arc::clone(&dispatcher),
            shutdown_rx,
        ));

        info!("Scheduler started");
        Arc::new(Self {
            registry,
            queue,
            dispatcher,
            sweeper: Mutex::new(Some(sweeper)),
            shutdown_tx,
        })
    }

    // ------------------------------------------------------------------
    // Worker control plane
    // ------------------------------------------------------------------

    pub fn register(
        &self,
        id: WorkerId,
        capabilities: WorkerCapabilities,
        address: String,
    ) -> Result<SessionToken, RegistryError> {
        self.registry.register(id, capabilities, address)
    }

    pub fn heartbeat(
        &self,
        id: &WorkerId,
        token: SessionToken,
        load: LoadSnapshot,
    ) -> Result<(), RegistryError> {
        self.registry.heartbeat(id, token, load)?;
        // The first heartbeat makes a worker ready; queued jobs may now match.
        self.dispatcher.pump();
        Ok(())
    }

    pub fn deregister(&self, id: &WorkerId) -> bool {
        self.registry.deregister(id)
    }

    pub fn list_workers(&self) -> Vec<WorkerSnapshot> {
        self.registry.list_workers()
    }

    pub fn available_models(&self) -> Vec<ModelDescriptor> {
        self.registry.available_models()
    }

    pub fn has_ready_model(&self, model: &str) -> bool {
        self.registry.has_ready_model(model)
    }

    // ------------------------------------------------------------------
    // Client surface
    // ------------------------------------------------------------------

    /// Submit for an aggregated response; resolve with
    /// [`JobHandle::into_result`].
    pub fn submit(&self, request: InferenceRequest) -> Result<JobHandle, JobError> {
        self.dispatcher.submit(request)
    }

    /// Submit for a streamed response; consume events with
    /// [`JobHandle::next_event`].
    pub fn submit_streaming(&self, request: InferenceRequest) -> Result<JobHandle, JobError> {
        self.dispatcher.submit_streaming(request)
    }

    pub fn cancel(&self, job_id: JobId) -> bool {
        self.dispatcher.cancel(job_id)
    }

    pub fn queue_depths(&self) -> QueueDepths {
        self.queue.depth_by_priority()
    }

    pub fn inflight_snapshot(&self) -> Vec<InFlightSnapshot> {
        self.dispatcher.inflight_snapshot()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Stop the background sweep and fail every queued and in-flight job.
    pub async fn shutdown(&self) {
        info!("Scheduler shutting down");
        let _ = self.shutdown_tx.send(true);
        let sweeper = self.sweeper.lock().unwrap().take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.await;
        }
        self.dispatcher.drain_all();
    }
}

/// Periodically expire overdue queued jobs and detect lost workers, then
/// re-pump dispatch.
async fn sweep_loop(
    registry: Arc<Registry>,
    queue: Arc<JobQueue>,
    dispatcher: Arc<Dispatcher>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                for job in queue.expire_overdue(now) {
                    debug!("Job {} expired while queued", job.id);
                    job.sink.fail(JobError::DeadlineExpired);
                }
                for worker in registry.sweep_overdue(now) {
                    dispatcher.notify_worker_lost(&worker);
                }
                dispatcher.pump();
            }
        }
    }
    debug!("Sweep loop stopped");
}
