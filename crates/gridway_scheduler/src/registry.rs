//! Worker Registry - authoritative view of the fleet.
//!
//! The registry is the only writer of worker state. Everything else reads
//! point-in-time snapshots; no caller holds the internal lock across I/O.
//! In-flight counters are owned here and moved only through
//! `try_acquire_slot`/`release_slot`, which the dispatcher pairs with its
//! in-flight table mutations.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use gridway_protocol::{
    Liveness, LoadSnapshot, ModelDescriptor, SessionToken, WorkerCapabilities, WorkerId,
};

use crate::error::RegistryError;

/// Registered worker state. Identity is the key in the workers map.
#[derive(Debug)]
struct WorkerEntry {
    address: String,
    capabilities: WorkerCapabilities,
    liveness: Liveness,
    session: SessionToken,
    /// Jobs currently assigned by the dispatcher. Authoritative.
    in_flight: u32,
    /// Load the worker last reported about itself. Informational.
    observed_load: u32,
    last_heartbeat: Instant,
    registered_at: Instant,
}

/// Observability snapshot of one worker.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub address: String,
    pub liveness: Liveness,
    pub in_flight: u32,
    pub observed_load: u32,
    pub max_concurrency: u32,
    pub supports_streaming: bool,
    pub models: Vec<String>,
    pub last_heartbeat_secs_ago: f64,
    pub uptime_secs: f64,
}

/// Authoritative in-memory directory of known workers.
pub struct Registry {
    workers: Mutex<HashMap<WorkerId, WorkerEntry>>,
    liveness_threshold: Duration,
}

impl Registry {
    pub fn new(liveness_threshold: Duration) -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
            liveness_threshold,
        }
    }

    /// Register a worker, idempotent by id. Capabilities are replaced
    /// atomically and the session token rotates; heartbeats carrying an older
    /// token fail with `StaleSession`.
    ///
    /// Re-registration under a different address is refused while the
    /// previous incarnation is live; a `lost` worker may re-register from
    /// anywhere (it is a fresh incarnation).
    pub fn register(
        &self,
        id: WorkerId,
        capabilities: WorkerCapabilities,
        address: String,
    ) -> Result<SessionToken, RegistryError> {
        let mut workers = self.workers.lock().unwrap();
        let now = Instant::now();
        let token = SessionToken::generate();

        if let Some(entry) = workers.get_mut(&id) {
            if entry.liveness != Liveness::Lost {
                if entry.address != address {
                    return Err(RegistryError::AddressConflict {
                        worker: id,
                        registered: entry.address.clone(),
                        offered: address,
                    });
                }
                debug!(
                    "Worker re-registered [{}]: {} models",
                    id,
                    capabilities.models.len()
                );
                entry.capabilities = capabilities;
                entry.session = token;
                entry.last_heartbeat = now;
                return Ok(token);
            }
            info!("Lost worker [{}] re-registered from {}", id, address);
        } else {
            info!("Worker joined [{}] at {}", id, address);
        }

        workers.insert(
            id,
            WorkerEntry {
                address,
                capabilities,
                liveness: Liveness::Joining,
                session: token,
                in_flight: 0,
                observed_load: 0,
                last_heartbeat: now,
                registered_at: now,
            },
        );
        Ok(token)
    }

    /// Refresh a worker's last-seen timestamp and observed load. The first
    /// acknowledged heartbeat moves the worker from `joining` to `ready`.
    pub fn heartbeat(
        &self,
        id: &WorkerId,
        token: SessionToken,
        load: LoadSnapshot,
    ) -> Result<(), RegistryError> {
        let mut workers = self.workers.lock().unwrap();
        let entry = workers
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownWorker { worker: id.clone() })?;

        // A lost worker must re-register; its session died with it.
        if entry.session != token || entry.liveness == Liveness::Lost {
            return Err(RegistryError::StaleSession { worker: id.clone() });
        }

        entry.last_heartbeat = Instant::now();
        entry.observed_load = load.in_flight;
        if entry.liveness == Liveness::Joining {
            info!("Worker ready [{}]", id);
            entry.liveness = Liveness::Ready;
        }
        Ok(())
    }

    /// Mark a worker draining. It receives no new assignments and is removed
    /// once its in-flight count reaches zero (immediately when idle).
    pub fn deregister(&self, id: &WorkerId) -> bool {
        let mut workers = self.workers.lock().unwrap();
        let Some(entry) = workers.get_mut(id) else {
            return false;
        };
        if entry.in_flight == 0 {
            info!("Worker deregistered [{}]", id);
            workers.remove(id);
        } else {
            info!("Worker draining [{}]: {} jobs in flight", id, entry.in_flight);
            entry.liveness = Liveness::Draining;
        }
        true
    }

    /// Workers eligible to run `model`, ordered by the selection policy:
    /// least-loaded first, then earliest registration, then lexicographic id.
    pub fn candidates(&self, model: &str) -> Vec<WorkerId> {
        let workers = self.workers.lock().unwrap();
        let mut eligible: Vec<(&WorkerId, &WorkerEntry)> = workers
            .iter()
            .filter(|(_, e)| e.liveness.accepts_assignments() && e.capabilities.has_model(model))
            .collect();
        eligible.sort_by(|(a_id, a), (b_id, b)| {
            a.in_flight
                .cmp(&b.in_flight)
                .then(a.registered_at.cmp(&b.registered_at))
                .then(a_id.cmp(b_id))
        });
        eligible.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// Whether any ready worker advertises `model`.
    pub fn has_ready_model(&self, model: &str) -> bool {
        let workers = self.workers.lock().unwrap();
        workers
            .values()
            .any(|e| e.liveness.accepts_assignments() && e.capabilities.has_model(model))
    }

    /// Whether `model` could be dispatched right now: a ready worker with a
    /// free concurrency slot advertises it.
    pub fn is_dispatchable(&self, model: &str) -> bool {
        let workers = self.workers.lock().unwrap();
        workers.values().any(|e| {
            e.liveness.accepts_assignments()
                && e.in_flight < e.capabilities.max_concurrency
                && e.capabilities.has_model(model)
        })
    }

    /// Union of model inventories over ready workers, deduplicated by name
    /// (newest modification timestamp wins), sorted by name.
    pub fn available_models(&self) -> Vec<ModelDescriptor> {
        let workers = self.workers.lock().unwrap();
        let mut by_name: HashMap<&str, &ModelDescriptor> = HashMap::new();
        for entry in workers.values() {
            if !entry.liveness.accepts_assignments() {
                continue;
            }
            for model in &entry.capabilities.models {
                by_name
                    .entry(model.name.as_str())
                    .and_modify(|current| {
                        if model.modified_at > current.modified_at {
                            *current = model;
                        }
                    })
                    .or_insert(model);
            }
        }
        let mut models: Vec<ModelDescriptor> = by_name.into_values().cloned().collect();
        models.sort_by(|a, b| a.name.cmp(&b.name));
        models
    }

    /// Reserve a concurrency slot on a ready worker. Returns false when the
    /// worker is gone, not ready, or already at its declared maximum.
    pub fn try_acquire_slot(&self, id: &WorkerId) -> bool {
        let mut workers = self.workers.lock().unwrap();
        let Some(entry) = workers.get_mut(id) else {
            return false;
        };
        if !entry.liveness.accepts_assignments()
            || entry.in_flight >= entry.capabilities.max_concurrency
        {
            return false;
        }
        entry.in_flight += 1;
        true
    }

    /// Release a previously acquired slot. Draining and lost workers are
    /// reaped once their last job releases.
    pub fn release_slot(&self, id: &WorkerId) {
        let mut workers = self.workers.lock().unwrap();
        let Some(entry) = workers.get_mut(id) else {
            return;
        };
        if entry.in_flight == 0 {
            warn!("Slot release for idle worker [{}]", id);
            return;
        }
        entry.in_flight -= 1;
        if entry.in_flight == 0 && !entry.liveness.holds_jobs() {
            info!("Reaping {} worker [{}]", entry.liveness, id);
            workers.remove(id);
        }
    }

    /// Address a worker was registered under, for the dispatch call.
    pub fn address_of(&self, id: &WorkerId) -> Option<String> {
        let workers = self.workers.lock().unwrap();
        workers.get(id).map(|e| e.address.clone())
    }

    /// Whether a worker advertised streaming support.
    pub fn supports_streaming(&self, id: &WorkerId) -> bool {
        let workers = self.workers.lock().unwrap();
        workers
            .get(id)
            .map(|e| e.capabilities.supports_streaming)
            .unwrap_or(false)
    }

    /// Declared concurrency of a worker's incarnation.
    pub fn in_flight_count(&self, id: &WorkerId) -> Option<u32> {
        let workers = self.workers.lock().unwrap();
        workers.get(id).map(|e| e.in_flight)
    }

    /// Transition every worker whose heartbeat is overdue to `lost` and
    /// return the newly lost ids so the dispatcher can fail or retry their
    /// jobs. Lost workers with nothing in flight are reaped immediately.
    pub fn sweep_overdue(&self, now: Instant) -> Vec<WorkerId> {
        let mut workers = self.workers.lock().unwrap();
        let mut lost = Vec::new();
        for (id, entry) in workers.iter_mut() {
            if entry.liveness == Liveness::Lost {
                continue;
            }
            let silence = now.saturating_duration_since(entry.last_heartbeat);
            if silence > self.liveness_threshold {
                warn!(
                    "Worker lost [{}]: last heartbeat {:.0}s ago",
                    id,
                    silence.as_secs_f64()
                );
                entry.liveness = Liveness::Lost;
                lost.push(id.clone());
            }
        }
        workers.retain(|id, entry| {
            let reap = entry.liveness == Liveness::Lost && entry.in_flight == 0;
            if reap {
                debug!("Reaped lost worker [{}]", id);
            }
            !reap
        });
        lost
    }

    /// Point-in-time snapshot of every known worker.
    pub fn list_workers(&self) -> Vec<WorkerSnapshot> {
        let workers = self.workers.lock().unwrap();
        let now = Instant::now();
        let mut snapshots: Vec<WorkerSnapshot> = workers
            .iter()
            .map(|(id, e)| WorkerSnapshot {
                id: id.clone(),
                address: e.address.clone(),
                liveness: e.liveness,
                in_flight: e.in_flight,
                observed_load: e.observed_load,
                max_concurrency: e.capabilities.max_concurrency,
                supports_streaming: e.capabilities.supports_streaming,
                models: e.capabilities.models.iter().map(|m| m.name.clone()).collect(),
                last_heartbeat_secs_ago: now
                    .saturating_duration_since(e.last_heartbeat)
                    .as_secs_f64(),
                uptime_secs: now.saturating_duration_since(e.registered_at).as_secs_f64(),
            })
            .collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }
}
