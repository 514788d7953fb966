//! Job Queue - priority-ordered holding area for undispatched jobs.
//!
//! One FIFO bucket per priority level; dispatch scans from the highest
//! non-empty bucket downward. Jobs keep their original queued-at timestamp
//! across a front-requeue so retries do not lose their place.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;
use tracing::debug;

use gridway_protocol::{InferenceRequest, JobId, Priority};

use crate::sink::JobSink;

/// A request augmented with scheduler state, waiting for dispatch.
pub struct QueuedJob {
    pub id: JobId,
    pub request: InferenceRequest,
    pub queued_at: Instant,
    pub deadline: Instant,
    /// Dispatch attempts so far, counting the upcoming one.
    pub attempt: u32,
    pub sink: JobSink,
}

impl QueuedJob {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline <= now
    }
}

/// Queue depths per priority, for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueDepths {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl QueueDepths {
    pub fn total(&self) -> usize {
        self.high + self.medium + self.low
    }
}

#[derive(Default)]
struct Buckets {
    high: VecDeque<QueuedJob>,
    medium: VecDeque<QueuedJob>,
    low: VecDeque<QueuedJob>,
}

impl Buckets {
    fn bucket_mut(&mut self, priority: Priority) -> &mut VecDeque<QueuedJob> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Medium => &mut self.medium,
            Priority::Low => &mut self.low,
        }
    }

    fn len(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len()
    }
}

/// Priority-ordered job queue with a configurable depth limit.
pub struct JobQueue {
    buckets: Mutex<Buckets>,
    depth_limit: usize,
}

impl JobQueue {
    pub fn new(depth_limit: usize) -> Self {
        Self {
            buckets: Mutex::new(Buckets::default()),
            depth_limit,
        }
    }

    pub fn depth_limit(&self) -> usize {
        self.depth_limit
    }

    /// Insert a job at the tail of its priority bucket. Fails when the
    /// configured depth limit is already reached.
    pub fn enqueue(&self, job: QueuedJob) -> Result<(), QueuedJob> {
        let mut buckets = self.buckets.lock().unwrap();
        if buckets.len() >= self.depth_limit {
            return Err(job);
        }
        debug!("Enqueued job {} ({})", job.id, job.request.priority);
        buckets.bucket_mut(job.request.priority).push_back(job);
        Ok(())
    }

    /// Return a job to the head of its priority bucket, preserving its
    /// original queued-at timestamp. Used when an assignment falls through or
    /// a lost worker's job is retried; never rejected by the depth limit.
    pub fn requeue_front(&self, job: QueuedJob) {
        let mut buckets = self.buckets.lock().unwrap();
        debug!("Requeued job {} at bucket head", job.id);
        buckets.bucket_mut(job.request.priority).push_front(job);
    }

    /// Remove and return the highest-priority, oldest job whose model
    /// satisfies `predicate`. Jobs whose deadline has passed are removed
    /// along the way and returned separately so the caller can fail them
    /// without consuming a worker slot.
    pub fn take_matching(
        &self,
        now: Instant,
        predicate: impl Fn(&str) -> bool,
    ) -> (Option<QueuedJob>, Vec<QueuedJob>) {
        let mut buckets = self.buckets.lock().unwrap();
        let mut expired = Vec::new();

        for priority in Priority::DESCENDING {
            let bucket = buckets.bucket_mut(*priority);
            let mut index = 0;
            while index < bucket.len() {
                if bucket[index].is_expired(now) {
                    if let Some(job) = bucket.remove(index) {
                        expired.push(job);
                    }
                    continue;
                }
                if predicate(&bucket[index].request.model) {
                    let job = bucket.remove(index);
                    return (job, expired);
                }
                index += 1;
            }
        }

        (None, expired)
    }

    /// Remove a queued job by id. Returns the job when it was still queued
    /// so the caller can surface `Cancelled`; no-op otherwise.
    pub fn cancel(&self, job_id: JobId) -> Option<QueuedJob> {
        let mut buckets = self.buckets.lock().unwrap();
        for priority in Priority::DESCENDING {
            let bucket = buckets.bucket_mut(*priority);
            if let Some(index) = bucket.iter().position(|job| job.id == job_id) {
                return bucket.remove(index);
            }
        }
        None
    }

    /// Drain every job whose deadline has passed.
    pub fn expire_overdue(&self, now: Instant) -> Vec<QueuedJob> {
        let mut buckets = self.buckets.lock().unwrap();
        let mut expired = Vec::new();
        for priority in Priority::DESCENDING {
            let bucket = buckets.bucket_mut(*priority);
            let mut index = 0;
            while index < bucket.len() {
                if bucket[index].is_expired(now) {
                    if let Some(job) = bucket.remove(index) {
                        expired.push(job);
                    }
                } else {
                    index += 1;
                }
            }
        }
        expired
    }

    /// Remove every queued job, highest priority first. Teardown path.
    pub fn drain_all(&self) -> Vec<QueuedJob> {
        let mut buckets = self.buckets.lock().unwrap();
        let mut jobs = Vec::with_capacity(buckets.len());
        for priority in Priority::DESCENDING {
            jobs.extend(buckets.bucket_mut(*priority).drain(..));
        }
        jobs
    }

    pub fn depth(&self) -> usize {
        self.buckets.lock().unwrap().len()
    }

    pub fn depth_by_priority(&self) -> QueueDepths {
        let buckets = self.buckets.lock().unwrap();
        QueueDepths {
            high: buckets.high.len(),
            medium: buckets.medium.len(),
            low: buckets.low.len(),
        }
    }
}
