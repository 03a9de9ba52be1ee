use std::ops::ControlFlow;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::backoff::BoundedRetry;
use crate::clock::{Clock, SystemClock};
use crate::error::{FleetError, Result};
use crate::worker::state::{Worker, WorkerCapabilities};

/// A capacity slot taken on a worker for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub worker_id: String,
    /// Load percentage before the slot was taken.
    pub load_snapshot: f64,
}

/// Authoritative in-memory view of the worker fleet.
///
/// Each worker lives in its own map entry, so heartbeats and load changes
/// for one worker are atomic without a registry-wide lock. Health is
/// recomputed from the heartbeat timestamp on every read.
pub struct WorkerRegistry {
    workers: DashMap<String, Worker>,
    clock: Arc<dyn Clock>,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl WorkerRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            workers: DashMap::new(),
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Register a worker, or refresh an existing registration in place.
    ///
    /// Re-registering keeps the current job count but replaces capacity and
    /// capabilities and counts as a fresh heartbeat.
    pub fn register(
        &self,
        id: &str,
        max_capacity: u32,
        capabilities: WorkerCapabilities,
    ) -> Result<Worker> {
        self.register_with_address(id, None, max_capacity, capabilities)
    }

    /// [`register`](Self::register) with the worker's network address. A
    /// re-registration without an address keeps the one already known.
    pub fn register_with_address(
        &self,
        id: &str,
        address: Option<String>,
        max_capacity: u32,
        capabilities: WorkerCapabilities,
    ) -> Result<Worker> {
        if max_capacity == 0 {
            return Err(FleetError::InvalidConfig(format!(
                "worker {} registered with zero capacity",
                id
            )));
        }
        let now = self.now();
        let worker = match self.workers.entry(id.to_string()) {
            Entry::Occupied(mut entry) => {
                let worker = entry.get_mut();
                worker.max_capacity = max_capacity;
                worker.capabilities = capabilities;
                if address.is_some() {
                    worker.address = address;
                }
                worker.last_heartbeat = now;
                worker.healthy = true;
                worker.clone()
            }
            Entry::Vacant(entry) => {
                let mut worker = Worker::new(id, max_capacity, capabilities, now);
                if let Some(address) = address {
                    worker = worker.with_address(address);
                }
                entry.insert(worker).clone()
            }
        };
        tracing::info!(
            worker_id = %worker.id,
            address = worker.address.as_deref().unwrap_or("-"),
            max_capacity,
            high_res = capabilities.supports_high_res,
            hardware_accel = capabilities.hardware_accel,
            "Worker registered"
        );
        Ok(worker)
    }

    /// Record a heartbeat carrying the worker's own job count.
    pub fn heartbeat(&self, id: &str, current_jobs: u32) -> Result<Worker> {
        let now = self.now();
        match self.workers.get_mut(id) {
            Some(mut worker) => {
                worker.current_jobs = current_jobs;
                worker.last_heartbeat = now;
                worker.healthy = true;
                Ok(worker.clone())
            }
            None => {
                tracing::warn!(worker_id = id, "Heartbeat from unregistered worker");
                Err(FleetError::WorkerNotFound(id.to_string()))
            }
        }
    }

    /// Remove a worker from the fleet.
    pub fn deregister(&self, id: &str) -> Option<Worker> {
        let removed = self.workers.remove(id).map(|(_, worker)| worker);
        if removed.is_some() {
            tracing::info!(worker_id = id, "Worker deregistered");
        }
        removed
    }

    pub fn is_healthy(&self, worker: &Worker, now: DateTime<Utc>) -> bool {
        worker.is_healthy_at(now)
    }

    pub fn get(&self, id: &str) -> Option<Worker> {
        let now = self.now();
        self.workers.get(id).map(|w| Self::snapshot(&w, now))
    }

    /// Every registered worker, sorted by id.
    pub fn workers(&self) -> Vec<Worker> {
        let now = self.now();
        let mut workers: Vec<Worker> = self
            .workers
            .iter()
            .map(|w| Self::snapshot(&w, now))
            .collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }

    pub fn healthy_workers(&self) -> Vec<Worker> {
        self.workers().into_iter().filter(|w| w.healthy).collect()
    }

    pub fn unhealthy_workers(&self) -> Vec<Worker> {
        self.workers().into_iter().filter(|w| !w.healthy).collect()
    }

    /// Healthy workers with spare capacity, optionally limited to
    /// high-resolution capable ones.
    pub fn available(&self, require_high_res: bool) -> Vec<Worker> {
        let now = self.now();
        self.workers()
            .into_iter()
            .filter(|w| w.can_take(require_high_res, now))
            .collect()
    }

    /// Least-loaded available worker. Ties go to the worker with the most
    /// remaining slots, then to the lowest id.
    pub fn select_by_load(&self, require_high_res: bool) -> Option<Worker> {
        self.available(require_high_res).into_iter().min_by(|a, b| {
            a.cmp_load(b)
                .then_with(|| b.remaining_capacity().cmp(&a.remaining_capacity()))
                .then_with(|| a.id.cmp(&b.id))
        })
    }

    /// Take one slot on `id`, re-checking health and capacity under the
    /// entry lock.
    pub fn try_increment(&self, id: &str) -> Result<Reservation> {
        let now = self.now();
        let mut worker = self
            .workers
            .get_mut(id)
            .ok_or_else(|| FleetError::WorkerNotFound(id.to_string()))?;
        if !worker.is_healthy_at(now) || !worker.has_capacity() {
            return Err(FleetError::AssignmentRace(id.to_string()));
        }
        let load_snapshot = worker.load_percent();
        worker.current_jobs += 1;
        Ok(Reservation {
            worker_id: worker.id.clone(),
            load_snapshot,
        })
    }

    /// Alias of [`try_increment`](Self::try_increment) returning the updated worker.
    pub fn increment_load(&self, id: &str) -> Result<Worker> {
        self.try_increment(id)?;
        self.get(id)
            .ok_or_else(|| FleetError::WorkerNotFound(id.to_string()))
    }

    /// Release one slot. Never drops below zero.
    pub fn decrement_load(&self, id: &str) -> Result<Worker> {
        let now = self.now();
        let mut worker = self
            .workers
            .get_mut(id)
            .ok_or_else(|| FleetError::WorkerNotFound(id.to_string()))?;
        worker.current_jobs = worker.current_jobs.saturating_sub(1);
        Ok(Self::snapshot(&worker, now))
    }

    /// Select and reserve a worker, retrying selection when the chosen worker
    /// fills up in between. Gives up with `WorkerUnavailable` after
    /// `max_tries` selections.
    pub fn reserve(&self, require_high_res: bool, max_tries: u32) -> Result<Reservation> {
        let reserved = BoundedRetry::new(max_tries).run(|attempt| {
            let Some(candidate) = self.select_by_load(require_high_res) else {
                return ControlFlow::Break(None);
            };
            match self.try_increment(&candidate.id) {
                Ok(reservation) => ControlFlow::Break(Some(reservation)),
                Err(e) => {
                    tracing::debug!(
                        worker_id = %candidate.id,
                        attempt,
                        error = %e,
                        "Reservation lost race, reselecting"
                    );
                    ControlFlow::Continue(())
                }
            }
        });
        reserved
            .flatten()
            .ok_or(FleetError::WorkerUnavailable { require_high_res })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    fn snapshot(worker: &Worker, now: DateTime<Utc>) -> Worker {
        let mut copy = worker.clone();
        copy.refresh_health(now);
        copy
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("workers", &self.workers.len())
            .finish()
    }
}
