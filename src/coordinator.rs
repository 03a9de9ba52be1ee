use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::alert::AlertSink;
use crate::clock::Clock;
use crate::config::FleetConfig;
use crate::connection::{ConnectionHealthMonitor, ConnectionState, Reconnector};
use crate::error::Result;
use crate::scheduler::{InMemoryJobStore, Job, JobDispatcher, JobSpec, JobStore};
use crate::worker::{Encoder, Worker, WorkerCapabilities, WorkerRegistry};

/// Read-only projection of the whole engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub taken_at: DateTime<Utc>,
    pub workers: Vec<Worker>,
    pub jobs: Vec<Job>,
    pub connections: Vec<ConnectionState>,
}

/// Wires the registry, store, dispatcher and connection monitor together
/// and runs their background loops.
pub struct Coordinator {
    config: FleetConfig,
    registry: Arc<WorkerRegistry>,
    store: Arc<dyn JobStore>,
    dispatcher: Arc<JobDispatcher>,
    monitor: Arc<ConnectionHealthMonitor>,
}

impl Coordinator {
    pub fn new(
        config: FleetConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn JobStore>,
        encoder: Arc<dyn Encoder>,
        reconnector: Arc<dyn Reconnector>,
        alerts: Arc<dyn AlertSink>,
    ) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(WorkerRegistry::new(clock.clone()));
        let dispatcher = Arc::new(JobDispatcher::new(
            registry.clone(),
            store.clone(),
            encoder,
            alerts.clone(),
            config.dispatch.clone(),
        ));
        let monitor = Arc::new(ConnectionHealthMonitor::new(
            config.sessions.reconnect,
            reconnector,
            alerts,
            clock,
        ));
        Ok(Self {
            config,
            registry,
            store,
            dispatcher,
            monitor,
        })
    }

    /// Coordinator backed by an [`InMemoryJobStore`] sized from the config.
    pub fn in_memory(
        config: FleetConfig,
        clock: Arc<dyn Clock>,
        encoder: Arc<dyn Encoder>,
        reconnector: Arc<dyn Reconnector>,
        alerts: Arc<dyn AlertSink>,
    ) -> Result<Self> {
        let store = Arc::new(InMemoryJobStore::with_capacity(config.max_jobs));
        Self::new(config, clock, store, encoder, reconnector, alerts)
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<JobDispatcher> {
        &self.dispatcher
    }

    pub fn monitor(&self) -> &Arc<ConnectionHealthMonitor> {
        &self.monitor
    }

    pub async fn register_worker(
        &self,
        id: &str,
        max_capacity: u32,
        capabilities: WorkerCapabilities,
    ) -> Result<Worker> {
        self.register_worker_at(id, None, max_capacity, capabilities)
            .await
    }

    pub async fn register_worker_at(
        &self,
        id: &str,
        address: Option<String>,
        max_capacity: u32,
        capabilities: WorkerCapabilities,
    ) -> Result<Worker> {
        let worker = self
            .registry
            .register_with_address(id, address, max_capacity, capabilities)?;
        self.store.record_worker(&worker).await?;
        Ok(worker)
    }

    pub async fn heartbeat(&self, id: &str, current_jobs: u32) -> Result<Worker> {
        let worker = self.registry.heartbeat(id, current_jobs)?;
        self.store.record_worker(&worker).await?;
        Ok(worker)
    }

    pub async fn deregister_worker(&self, id: &str) -> Result<Option<Worker>> {
        let removed = self.registry.deregister(id);
        self.store.remove_worker(id).await?;
        Ok(removed)
    }

    pub async fn submit(&self, spec: JobSpec) -> Result<Job> {
        self.dispatcher.submit(spec).await
    }

    pub async fn snapshot(&self) -> Result<FleetSnapshot> {
        Ok(FleetSnapshot {
            taken_at: self.registry.now(),
            workers: self.registry.workers(),
            jobs: self.store.list_jobs().await?,
            connections: self.monitor.sessions(),
        })
    }

    /// Run the dispatch loop, the session sweeper and the worker health
    /// sweep until `cancel` fires. Returns once all of them have stopped.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            dispatch_interval_ms = self.config.dispatch.interval.as_millis() as u64,
            batch_limit = self.config.dispatch.batch_limit,
            max_reconnect_attempts = self.config.sessions.reconnect.max_attempts(),
            "Coordinator started"
        );

        tokio::join!(
            self.dispatcher.clone().run(cancel.clone()),
            self.monitor.clone().run_sweeper(
                self.config.sessions.sweep_interval,
                self.config.sessions.ttl,
                cancel.clone(),
            ),
            Self::health_sweep(
                self.registry.clone(),
                self.config.health_sweep_interval,
                cancel.clone(),
            ),
        );

        tracing::info!("Coordinator stopped");
    }

    /// Log workers as they go stale or come back. Health itself is derived
    /// on read; this loop only reports transitions.
    async fn health_sweep(
        registry: Arc<WorkerRegistry>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        let mut unhealthy: HashSet<String> = HashSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let current: HashSet<String> = registry
                        .unhealthy_workers()
                        .into_iter()
                        .map(|w| w.id)
                        .collect();
                    for id in current.difference(&unhealthy) {
                        tracing::warn!(worker_id = %id, "Worker stopped heartbeating");
                    }
                    for id in unhealthy.difference(&current) {
                        if registry.get(id).is_some() {
                            tracing::info!(worker_id = %id, "Worker healthy again");
                        }
                    }
                    unhealthy = current;
                }
            }
        }
    }
}
