//! Integration tests for the scheduler core.
//!
//! Exercises the full dispatch path - registry, queue, dispatcher, broker -
//! against an in-process mock worker adapter. Liveness transitions are driven
//! deterministically through `Registry::sweep_overdue` instead of waiting for
//! the background sweep.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::timeout;

use gridway_protocol::config::SchedulerConfig;
use gridway_protocol::wire::{DispatchBody, FinishReason, WorkerRecord};
use gridway_protocol::{
    GenerationOptions, InferenceRequest, JobId, LoadSnapshot, ModelDescriptor, Priority, Protocol,
    RequestPayload, SessionToken, SubmissionMeta, WorkerCapabilities, WorkerId,
};
use gridway_scheduler::{
    AdapterError, ChunkSource, Dispatcher, JobError, JobEvent, JobQueue, Registry, Scheduler,
    StreamBroker, WorkerAdapter,
};

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Mock worker adapter
// ============================================================================

#[derive(Clone)]
enum Behavior {
    /// Streaming frames, then end-of-stream.
    Stream(Vec<String>),
    /// Streaming frames, then the stream hangs open forever.
    StreamThenHang(Vec<String>),
    /// Non-streaming JSON record.
    Respond(String),
    /// Transport failure on dispatch.
    Unreachable,
    /// Dispatch call never resolves.
    Hang,
}

#[derive(Default)]
struct MockAdapter {
    behaviors: Mutex<HashMap<String, Behavior>>,
    dispatches: Mutex<Vec<(String, DispatchBody)>>,
    cancels: Mutex<Vec<(String, JobId)>>,
}

impl MockAdapter {
    fn set_behavior(&self, address: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(address.to_string(), behavior);
    }

    fn behavior(&self, address: &str) -> Behavior {
        self.behaviors
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or(Behavior::Unreachable)
    }

    fn dispatched_addresses(&self) -> Vec<String> {
        self.dispatches
            .lock()
            .unwrap()
            .iter()
            .map(|(address, _)| address.clone())
            .collect()
    }

    fn dispatched_prompts(&self) -> Vec<String> {
        self.dispatches
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, body)| body.prompt.clone())
            .collect()
    }

    fn dispatch_count(&self) -> usize {
        self.dispatches.lock().unwrap().len()
    }

    fn record_dispatch(&self, address: &str, body: &DispatchBody) {
        self.dispatches
            .lock()
            .unwrap()
            .push((address.to_string(), body.clone()));
    }
}

#[async_trait]
impl WorkerAdapter for MockAdapter {
    async fn dispatch(
        &self,
        address: &str,
        body: DispatchBody,
    ) -> Result<WorkerRecord, AdapterError> {
        self.record_dispatch(address, &body);
        match self.behavior(address) {
            Behavior::Respond(json) => Ok(serde_json::from_str(&json).unwrap()),
            Behavior::Unreachable => Err(AdapterError::Unreachable("connection refused".into())),
            Behavior::Hang => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
            Behavior::Stream(_) | Behavior::StreamThenHang(_) => {
                panic!("non-streaming dispatch against a streaming behavior")
            }
        }
    }

    async fn dispatch_streaming(
        &self,
        address: &str,
        body: DispatchBody,
    ) -> Result<ChunkSource, AdapterError> {
        self.record_dispatch(address, &body);
        match self.behavior(address) {
            Behavior::Stream(frames) => Ok(ChunkSource::new(futures::stream::iter(
                frames.into_iter().map(|frame| Ok(Bytes::from(frame))),
            ))),
            Behavior::StreamThenHang(frames) => {
                let head = futures::stream::iter(
                    frames.into_iter().map(|frame| Ok(Bytes::from(frame))),
                );
                Ok(ChunkSource::new(head.chain(futures::stream::pending())))
            }
            Behavior::Respond(_) => panic!("streaming dispatch against a respond behavior"),
            Behavior::Unreachable => Err(AdapterError::Unreachable("connection refused".into())),
            Behavior::Hang => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn cancel(&self, address: &str, job_id: JobId) {
        self.cancels
            .lock()
            .unwrap()
            .push((address.to_string(), job_id));
    }

    async fn health(&self, _address: &str) -> Result<(), AdapterError> {
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    registry: Arc<Registry>,
    queue: Arc<JobQueue>,
    dispatcher: Arc<Dispatcher>,
    adapter: Arc<MockAdapter>,
    config: SchedulerConfig,
}

fn harness(config: SchedulerConfig) -> Harness {
    let registry = Arc::new(Registry::new(config.liveness_threshold));
    let queue = Arc::new(JobQueue::new(config.queue_depth_limit));
    let broker = Arc::new(StreamBroker::new());
    let adapter = Arc::new(MockAdapter::default());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&queue),
        broker,
        Arc::clone(&adapter) as Arc<dyn WorkerAdapter>,
        config.clone(),
    ));
    Harness {
        registry,
        queue,
        dispatcher,
        adapter,
        config,
    }
}

fn caps(models: &[&str], max_concurrency: u32) -> WorkerCapabilities {
    WorkerCapabilities {
        models: models
            .iter()
            .map(|name| ModelDescriptor {
                name: name.to_string(),
                modified_at: chrono::Utc::now(),
                size_bytes: None,
                family: None,
            })
            .collect(),
        max_concurrency,
        supports_streaming: true,
    }
}

impl Harness {
    fn ready_worker(
        &self,
        id: &str,
        models: &[&str],
        max_concurrency: u32,
        behavior: Behavior,
    ) -> SessionToken {
        let address = format!("http://{}", id);
        self.adapter.set_behavior(&address, behavior);
        let token = self
            .registry
            .register(WorkerId::from(id), caps(models, max_concurrency), address)
            .unwrap();
        self.registry
            .heartbeat(&WorkerId::from(id), token, LoadSnapshot::default())
            .unwrap();
        self.dispatcher.pump();
        token
    }

    /// Declare `id` lost, deterministically.
    fn lose_worker(&self, id: &str) {
        let horizon = Instant::now() + self.config.liveness_threshold * 4;
        let lost = self.registry.sweep_overdue(horizon);
        assert!(lost.contains(&WorkerId::from(id)), "worker {} not overdue", id);
        for worker in lost {
            self.dispatcher.notify_worker_lost(&worker);
        }
    }
}

fn request(model: &str, prompt: &str, priority: Priority) -> InferenceRequest {
    InferenceRequest {
        model: model.to_string(),
        payload: RequestPayload::Generate {
            prompt: prompt.to_string(),
        },
        options: GenerationOptions::new(),
        passthrough: Default::default(),
        priority,
        stream: false,
        timeout: None,
        meta: SubmissionMeta::now(Protocol::Native),
    }
}

fn frames(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|line| format!("{}\n", line)).collect()
}

/// Assignment tasks run concurrently with the test body; wait for their
/// observable side effects instead of asserting immediately.
async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let waited = timeout(WAIT, async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}

fn ok_stream() -> Behavior {
    Behavior::Stream(frames(&[
        r#"{"response":"He","done":false}"#,
        r#"{"response":"llo","done":false}"#,
        r#"{"done":true,"done_reason":"stop","prompt_eval_count":1,"eval_count":2}"#,
    ]))
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_non_streaming_round_trip() {
    let h = harness(SchedulerConfig::default());
    h.ready_worker(
        "w1",
        &["m1"],
        2,
        Behavior::Respond(
            r#"{"response":"Hello","done":true,"done_reason":"stop","prompt_eval_count":1,"eval_count":2}"#.into(),
        ),
    );

    let handle = h.dispatcher.submit(request("m1", "Hi", Priority::Medium)).unwrap();
    let completion = timeout(WAIT, handle.into_result()).await.unwrap().unwrap();

    assert_eq!(completion.text.as_deref(), Some("Hello"));
    assert_eq!(completion.finish_reason, FinishReason::Stop);
    assert_eq!(completion.usage.unwrap().total(), 3);
    // Slot released on completion.
    assert_eq!(h.registry.in_flight_count(&WorkerId::from("w1")), Some(0));
}

#[tokio::test]
async fn test_streaming_chunks_arrive_in_order() {
    let h = harness(SchedulerConfig::default());
    h.ready_worker("w1", &["m1"], 2, ok_stream());

    let mut handle = h
        .dispatcher
        .submit_streaming(request("m1", "Hi", Priority::Medium))
        .unwrap();

    let mut texts = Vec::new();
    loop {
        match timeout(WAIT, handle.next_event()).await.unwrap() {
            Some(JobEvent::Chunk(text)) => texts.push(text),
            Some(JobEvent::Complete(completion)) => {
                assert_eq!(completion.finish_reason, FinishReason::Stop);
                break;
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
    assert_eq!(texts, vec!["He".to_string(), "llo".to_string()]);
}

/// Two workers advertise m1; the loaded one is passed over.
#[tokio::test]
async fn test_least_loaded_worker_selected() {
    let h = harness(SchedulerConfig::default());
    h.ready_worker("w1", &["m1"], 4, Behavior::Hang);

    // Two jobs pin w1 at in_flight=2.
    let _j1 = h.dispatcher.submit(request("m1", "a", Priority::Medium)).unwrap();
    let _j2 = h.dispatcher.submit(request("m1", "b", Priority::Medium)).unwrap();
    assert_eq!(h.registry.in_flight_count(&WorkerId::from("w1")), Some(2));

    h.ready_worker("w2", &["m1"], 4, Behavior::Hang);
    let handle = h.dispatcher.submit(request("m1", "c", Priority::Medium)).unwrap();
    drop(handle);

    assert_eq!(h.registry.in_flight_count(&WorkerId::from("w2")), Some(1));
    wait_until("third dispatch", || h.adapter.dispatch_count() == 3).await;
    assert_eq!(h.adapter.dispatched_addresses().last().unwrap(), "http://w2");
}

/// Requesting a model nobody serves fails synchronously, before enqueue.
#[tokio::test]
async fn test_model_unavailable_rejected_synchronously() {
    let h = harness(SchedulerConfig::default());
    h.ready_worker("w1", &["m1"], 2, ok_stream());

    let err = h
        .dispatcher
        .submit(request("unknown", "Hi", Priority::Medium))
        .unwrap_err();
    assert_eq!(
        err,
        JobError::ModelUnavailable {
            model: "unknown".to_string()
        }
    );
    assert_eq!(h.queue.depth(), 0);
    assert_eq!(h.adapter.dispatch_count(), 0);
}

/// Worker lost before any chunk: the job is retried on another worker with
/// its attempt count incremented.
#[tokio::test]
async fn test_worker_lost_before_chunk_is_retried() {
    let h = harness(SchedulerConfig::default());
    h.ready_worker("w1", &["m1"], 2, Behavior::Hang);

    let handle = h
        .dispatcher
        .submit_streaming(request("m1", "Hi", Priority::Medium))
        .unwrap();
    wait_until("first dispatch", || h.adapter.dispatch_count() == 1).await;
    assert_eq!(h.adapter.dispatched_addresses(), vec!["http://w1"]);

    h.lose_worker("w1");
    // Job is back at the head of its bucket, attempt 2, waiting for capacity.
    assert_eq!(h.queue.depth(), 1);

    h.ready_worker("w2", &["m1"], 2, ok_stream());
    let completion = timeout(WAIT, handle.into_result()).await.unwrap().unwrap();
    assert_eq!(completion.text.as_deref(), Some("Hello"));
    assert_eq!(
        h.adapter.dispatched_addresses(),
        vec!["http://w1", "http://w2"]
    );
}

/// Worker lost after a chunk reached the client: failure is final.
#[tokio::test]
async fn test_worker_lost_after_chunk_is_final() {
    let h = harness(SchedulerConfig::default());
    h.ready_worker(
        "w1",
        &["m1"],
        2,
        Behavior::StreamThenHang(frames(&[r#"{"response":"He","done":false}"#])),
    );

    let mut handle = h
        .dispatcher
        .submit_streaming(request("m1", "Hi", Priority::Medium))
        .unwrap();
    assert_eq!(
        timeout(WAIT, handle.next_event()).await.unwrap(),
        Some(JobEvent::Chunk("He".to_string()))
    );

    h.lose_worker("w1");
    match timeout(WAIT, handle.next_event()).await.unwrap() {
        Some(JobEvent::Error(JobError::WorkerLost { worker })) => {
            assert_eq!(worker, WorkerId::from("w1"));
        }
        other => panic!("expected WorkerLost, got {:?}", other),
    }
}

/// A high-priority job enqueued after two mediums goes out first.
#[tokio::test]
async fn test_high_priority_dispatched_first() {
    let h = harness(SchedulerConfig::default());
    h.ready_worker("w1", &["m1"], 1, Behavior::Hang);

    // Saturate the only slot so subsequent submissions stay queued.
    let blocker = h.dispatcher.submit(request("m1", "blocker", Priority::Medium)).unwrap();
    wait_until("blocker dispatch", || h.adapter.dispatch_count() == 1).await;
    let med1 = h.dispatcher.submit(request("m1", "med1", Priority::Medium)).unwrap();
    let med2 = h.dispatcher.submit(request("m1", "med2", Priority::Medium)).unwrap();
    let high = h.dispatcher.submit(request("m1", "high", Priority::High)).unwrap();
    assert_eq!(h.queue.depth(), 3);

    // Free the slot; queued jobs now drain through the single slot.
    h.adapter.set_behavior(
        "http://w1",
        Behavior::Respond(r#"{"response":"ok","done":true,"eval_count":1}"#.into()),
    );
    assert!(h.dispatcher.cancel(blocker.job_id()));

    for handle in [high, med1, med2] {
        timeout(WAIT, handle.into_result()).await.unwrap().unwrap();
    }
    assert_eq!(
        h.adapter.dispatched_prompts(),
        vec![
            "blocker".to_string(),
            "high".to_string(),
            "med1".to_string(),
            "med2".to_string()
        ]
    );
}

/// A streaming job passes over workers that did not advertise streaming.
#[tokio::test]
async fn test_streaming_jobs_skip_non_streaming_workers() {
    let h = harness(SchedulerConfig::default());
    // w1 cannot stream; registered first, idle, so it would otherwise win.
    let mut w1_caps = caps(&["m1"], 4);
    w1_caps.supports_streaming = false;
    let token = h
        .registry
        .register(WorkerId::from("w1"), w1_caps, "http://w1".into())
        .unwrap();
    h.registry
        .heartbeat(&WorkerId::from("w1"), token, LoadSnapshot::default())
        .unwrap();
    h.adapter.set_behavior("http://w1", Behavior::Hang);
    h.ready_worker("w2", &["m1"], 4, ok_stream());

    let handle = h
        .dispatcher
        .submit_streaming(request("m1", "Hi", Priority::Medium))
        .unwrap();
    let completion = timeout(WAIT, handle.into_result()).await.unwrap().unwrap();
    assert_eq!(completion.text.as_deref(), Some("Hello"));
    assert_eq!(h.adapter.dispatched_addresses(), vec!["http://w2"]);
}

/// Cancelling a queued job surfaces Cancelled and contacts no worker.
#[tokio::test]
async fn test_cancel_queued_job() {
    let h = harness(SchedulerConfig::default());
    h.ready_worker("w1", &["m1"], 1, Behavior::Hang);

    let _blocker = h.dispatcher.submit(request("m1", "blocker", Priority::Medium)).unwrap();
    wait_until("blocker dispatch", || h.adapter.dispatch_count() == 1).await;
    let queued = h.dispatcher.submit(request("m1", "queued", Priority::Medium)).unwrap();
    assert_eq!(h.queue.depth(), 1);

    assert!(h.dispatcher.cancel(queued.job_id()));
    let err = timeout(WAIT, queued.into_result()).await.unwrap().unwrap_err();
    assert_eq!(err, JobError::Cancelled);

    // Only the blocker ever reached the adapter.
    assert_eq!(h.adapter.dispatch_count(), 1);
    assert_eq!(h.queue.depth(), 0);
}

/// Cancelling an in-flight job detaches the stream and signals the worker.
#[tokio::test]
async fn test_cancel_running_job_signals_worker() {
    let h = harness(SchedulerConfig::default());
    h.ready_worker("w1", &["m1"], 2, Behavior::StreamThenHang(frames(&[
        r#"{"response":"He","done":false}"#,
    ])));

    let mut handle = h
        .dispatcher
        .submit_streaming(request("m1", "Hi", Priority::Medium))
        .unwrap();
    assert_eq!(
        timeout(WAIT, handle.next_event()).await.unwrap(),
        Some(JobEvent::Chunk("He".to_string()))
    );

    let job_id = handle.job_id();
    assert!(h.dispatcher.cancel(job_id));
    match timeout(WAIT, handle.next_event()).await.unwrap() {
        Some(JobEvent::Error(JobError::Cancelled)) => {}
        other => panic!("expected Cancelled, got {:?}", other),
    }

    // Best-effort cancel reached the adapter.
    wait_until("cancel signal", || {
        !h.adapter.cancels.lock().unwrap().is_empty()
    })
    .await;
    assert_eq!(h.registry.in_flight_count(&WorkerId::from("w1")), Some(0));
}

/// With queue_depth_limit = N and N queued jobs, enqueue N+1 fails; after a
/// cancel, a subsequent enqueue succeeds.
#[tokio::test]
async fn test_queue_full_boundary() {
    let config = SchedulerConfig {
        queue_depth_limit: 2,
        ..SchedulerConfig::default()
    };
    let h = harness(config);
    h.ready_worker("w1", &["m1"], 1, Behavior::Hang);

    let _blocker = h.dispatcher.submit(request("m1", "blocker", Priority::Medium)).unwrap();
    let q1 = h.dispatcher.submit(request("m1", "q1", Priority::Medium)).unwrap();
    let _q2 = h.dispatcher.submit(request("m1", "q2", Priority::Medium)).unwrap();

    let err = h
        .dispatcher
        .submit(request("m1", "q3", Priority::Medium))
        .unwrap_err();
    assert_eq!(err, JobError::QueueFull { limit: 2 });

    assert!(h.dispatcher.cancel(q1.job_id()));
    h.dispatcher.submit(request("m1", "q3", Priority::Medium)).unwrap();
}

/// With max_attempts = k, the k-th loss is final.
#[tokio::test]
async fn test_max_attempts_exhaustion() {
    let config = SchedulerConfig {
        max_attempts: 3,
        ..SchedulerConfig::default()
    };
    let h = harness(config);
    h.ready_worker("w1", &["m1"], 2, Behavior::Unreachable);

    let handle = h
        .dispatcher
        .submit_streaming(request("m1", "Hi", Priority::Medium))
        .unwrap();
    let err = timeout(WAIT, handle.into_result()).await.unwrap().unwrap_err();
    assert!(matches!(err, JobError::WorkerLost { .. }));
    assert_eq!(h.adapter.dispatch_count(), 3);
}

/// A job whose deadline already passed is dropped at take time and never
/// dispatched.
#[tokio::test]
async fn test_expired_job_never_dispatched() {
    let h = harness(SchedulerConfig::default());
    h.ready_worker("w1", &["m1"], 1, Behavior::Hang);

    let _blocker = h.dispatcher.submit(request("m1", "blocker", Priority::Medium)).unwrap();
    wait_until("blocker dispatch", || h.adapter.dispatch_count() == 1).await;

    let mut expired = request("m1", "expired", Priority::Medium);
    expired.timeout = Some(Duration::ZERO);
    let handle = h.dispatcher.submit(expired).unwrap();

    let err = timeout(WAIT, handle.into_result()).await.unwrap().unwrap_err();
    assert_eq!(err, JobError::DeadlineExpired);
    assert_eq!(h.adapter.dispatch_count(), 1);
}

/// Worker in-flight counters always match the in-flight table.
#[tokio::test]
async fn test_inflight_counters_match_table() {
    let h = harness(SchedulerConfig::default());
    h.ready_worker("w1", &["m1"], 2, Behavior::Hang);
    h.ready_worker("w2", &["m1"], 2, Behavior::Hang);

    for prompt in ["a", "b", "c"] {
        h.dispatcher.submit(request("m1", prompt, Priority::Medium)).unwrap();
    }

    let snapshot = h.dispatcher.inflight_snapshot();
    assert_eq!(snapshot.len(), 3);
    for worker in ["w1", "w2"] {
        let id = WorkerId::from(worker);
        let table_rows = snapshot.iter().filter(|row| row.worker == id).count() as u32;
        assert_eq!(h.registry.in_flight_count(&id), Some(table_rows));
    }
}

/// Draining workers finish their jobs but accept nothing new.
#[tokio::test]
async fn test_draining_worker_completes_but_accepts_nothing() {
    let h = harness(SchedulerConfig::default());
    h.ready_worker(
        "w1",
        &["m1"],
        2,
        Behavior::StreamThenHang(frames(&[r#"{"response":"x","done":false}"#])),
    );

    let mut running = h
        .dispatcher
        .submit_streaming(request("m1", "running", Priority::Medium))
        .unwrap();
    assert_eq!(
        timeout(WAIT, running.next_event()).await.unwrap(),
        Some(JobEvent::Chunk("x".to_string()))
    );

    assert!(h.registry.deregister(&WorkerId::from("w1")));
    // m1 no longer advertised by any ready worker.
    let err = h
        .dispatcher
        .submit(request("m1", "rejected", Priority::Medium))
        .unwrap_err();
    assert!(matches!(err, JobError::ModelUnavailable { .. }));

    // The running job is still healthy on the draining worker.
    assert_eq!(h.dispatcher.inflight_snapshot().len(), 1);
}

// ============================================================================
// Scheduler aggregate (real background sweep)
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_background_sweep_detects_lost_worker() {
    let config = SchedulerConfig {
        liveness_threshold: Duration::from_millis(100),
        max_attempts: 1,
        ..SchedulerConfig::default()
    };
    let adapter = Arc::new(MockAdapter::default());
    adapter.set_behavior("http://w1", Behavior::Hang);
    let scheduler = Scheduler::new(config, Arc::clone(&adapter) as Arc<dyn WorkerAdapter>);

    let token = scheduler
        .register(WorkerId::from("w1"), caps(&["m1"], 2), "http://w1".into())
        .unwrap();
    scheduler
        .heartbeat(&WorkerId::from("w1"), token, LoadSnapshot::default())
        .unwrap();

    let handle = scheduler
        .submit_streaming(request("m1", "Hi", Priority::Medium))
        .unwrap();

    // No further heartbeats: the sweep declares w1 lost and fails the job.
    let err = timeout(WAIT, handle.into_result()).await.unwrap().unwrap_err();
    assert!(matches!(err, JobError::WorkerLost { .. }));
    assert!(scheduler.list_workers().is_empty());

    scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_fails_outstanding_jobs() {
    let adapter = Arc::new(MockAdapter::default());
    adapter.set_behavior("http://w1", Behavior::Hang);
    let scheduler = Scheduler::new(
        SchedulerConfig::default(),
        Arc::clone(&adapter) as Arc<dyn WorkerAdapter>,
    );

    let token = scheduler
        .register(WorkerId::from("w1"), caps(&["m1"], 1), "http://w1".into())
        .unwrap();
    scheduler
        .heartbeat(&WorkerId::from("w1"), token, LoadSnapshot::default())
        .unwrap();

    let running = scheduler.submit(request("m1", "running", Priority::Medium)).unwrap();
    let queued = scheduler.submit(request("m1", "queued", Priority::Medium)).unwrap();

    scheduler.shutdown().await;

    let err = timeout(WAIT, running.into_result()).await.unwrap().unwrap_err();
    assert_eq!(err, JobError::Cancelled);
    let err = timeout(WAIT, queued.into_result()).await.unwrap().unwrap_err();
    assert_eq!(err, JobError::Cancelled);
}
