//! Shared fakes for integration tests: a scriptable encoder, a reconnector
//! that fails a set number of times, an alert sink that counts calls, and a
//! manual clock pinned to a fixed start.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use uuid::Uuid;

use transcode_fleet::alert::AlertSink;
use transcode_fleet::clock::ManualClock;
use transcode_fleet::config::FleetConfig;
use transcode_fleet::connection::{ConnectionState, Reconnector};
use transcode_fleet::coordinator::Coordinator;
use transcode_fleet::media::Resolution;
use transcode_fleet::scheduler::{
    InMemoryJobStore, Job, JobDispatcher, JobSpec, JobStore, Output, Transition,
};
use transcode_fleet::worker::{EncodedOutput, Encoder, TranscodeRequest, Worker, WorkerRegistry};
use transcode_fleet::{FleetError, Result};

pub fn start_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(start_time()))
}

/// What the fake encoder does for a given resolution.
#[derive(Debug, Clone)]
pub enum EncodeBehavior {
    /// Return the canonical dimensions of the requested resolution.
    Exact,
    /// Return these dimensions instead.
    Dimensions(u32, u32),
    /// Fail with this message.
    Fail(String),
}

pub struct FakeEncoder {
    default: EncodeBehavior,
    overrides: Mutex<HashMap<Resolution, EncodeBehavior>>,
    requests: Mutex<Vec<TranscodeRequest>>,
    delay: Duration,
    gate: Option<Arc<Notify>>,
}

impl FakeEncoder {
    pub fn exact() -> Self {
        Self::with_default(EncodeBehavior::Exact)
    }

    pub fn with_default(default: EncodeBehavior) -> Self {
        Self {
            default,
            overrides: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            gate: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Block every transcode until the gate is notified.
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn set(&self, resolution: Resolution, behavior: EncodeBehavior) {
        self.overrides.lock().unwrap().insert(resolution, behavior);
    }

    pub fn requests(&self) -> Vec<TranscodeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn transcode(&self, request: &TranscodeRequest) -> Result<EncodedOutput> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let behavior = self
            .overrides
            .lock()
            .unwrap()
            .get(&request.resolution)
            .cloned()
            .unwrap_or_else(|| self.default.clone());
        let (width, height) = match behavior {
            EncodeBehavior::Exact => request.resolution.dimensions(),
            EncodeBehavior::Dimensions(w, h) => (w, h),
            EncodeBehavior::Fail(message) => return Err(FleetError::EncodingFailed(message)),
        };
        Ok(EncodedOutput {
            width,
            height,
            bitrate_kbps: request.bitrate_kbps,
            size_bytes: 4096,
            duration_secs: 12.5,
            storage_ref: format!("mem://{}/{}", request.job_id, request.resolution),
        })
    }
}

/// Fails the first `failures` attempts of every session, then succeeds.
pub struct ScriptedReconnector {
    failures: u32,
    calls: Mutex<Vec<(String, u32)>>,
}

impl ScriptedReconnector {
    pub fn failing(failures: u32) -> Self {
        Self {
            failures,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn always_failing() -> Self {
        Self::failing(u32::MAX)
    }

    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reconnector for ScriptedReconnector {
    async fn reconnect(&self, session_id: &str, attempt: u32) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((session_id.to_string(), attempt));
        if attempt <= self.failures {
            return Err(FleetError::Internal("ingest unreachable".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAlerts {
    failovers: Mutex<Vec<ConnectionState>>,
    failed_jobs: Mutex<Vec<Job>>,
    failover_count: AtomicUsize,
}

impl RecordingAlerts {
    pub fn failovers(&self) -> Vec<ConnectionState> {
        self.failovers.lock().unwrap().clone()
    }

    pub fn failover_count(&self) -> usize {
        self.failover_count.load(Ordering::SeqCst)
    }

    pub fn failed_jobs(&self) -> Vec<Job> {
        self.failed_jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlerts {
    async fn connection_failed_over(&self, state: &ConnectionState) {
        self.failover_count.fetch_add(1, Ordering::SeqCst);
        self.failovers.lock().unwrap().push(state.clone());
    }

    async fn job_failed(&self, job: &Job) {
        self.failed_jobs.lock().unwrap().push(job.clone());
    }
}

/// In-memory store with injectable write failures.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryJobStore,
    assign_calls: AtomicUsize,
    /// 1-based `assign_worker` call that fails, 0 for none.
    fail_assign_call: AtomicUsize,
    fail_progress: AtomicBool,
    fail_complete: AtomicBool,
    fail_fail: AtomicBool,
}

impl FlakyStore {
    pub fn fail_assign_call(&self, call: usize) {
        self.fail_assign_call.store(call, Ordering::SeqCst);
    }

    pub fn fail_progress(&self, fail: bool) {
        self.fail_progress.store(fail, Ordering::SeqCst);
    }

    pub fn fail_complete(&self, fail: bool) {
        self.fail_complete.store(fail, Ordering::SeqCst);
    }

    pub fn fail_fail(&self, fail: bool) {
        self.fail_fail.store(fail, Ordering::SeqCst);
    }

    fn outage() -> FleetError {
        FleetError::Internal("store unavailable".to_string())
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn create_job(&self, spec: JobSpec, created_at: DateTime<Utc>) -> Result<Job> {
        self.inner.create_job(spec, created_at).await
    }

    async fn get_job(&self, id: &Uuid) -> Result<Job> {
        self.inner.get_job(id).await
    }

    async fn queued_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        self.inner.queued_jobs(limit).await
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        self.inner.list_jobs().await
    }

    async fn assign_worker(
        &self,
        id: &Uuid,
        worker_id: &str,
        load_snapshot: f64,
        at: DateTime<Utc>,
    ) -> Result<Transition> {
        let call = self.assign_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_assign_call.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        self.inner
            .assign_worker(id, worker_id, load_snapshot, at)
            .await
    }

    async fn update_progress(&self, id: &Uuid, percent: f64) -> Result<Transition> {
        if self.fail_progress.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        self.inner.update_progress(id, percent).await
    }

    async fn complete_job(
        &self,
        id: &Uuid,
        outputs: Vec<Output>,
        at: DateTime<Utc>,
    ) -> Result<Transition> {
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        self.inner.complete_job(id, outputs, at).await
    }

    async fn fail_job(&self, id: &Uuid, error: String, at: DateTime<Utc>) -> Result<Transition> {
        if self.fail_fail.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        self.inner.fail_job(id, error, at).await
    }

    async fn record_worker(&self, worker: &Worker) -> Result<()> {
        self.inner.record_worker(worker).await
    }

    async fn remove_worker(&self, id: &str) -> Result<Option<Worker>> {
        self.inner.remove_worker(id).await
    }

    async fn workers(&self, now: DateTime<Utc>) -> Result<Vec<Worker>> {
        self.inner.workers(now).await
    }
}

/// A dispatcher over an in-memory store, with handles to every piece.
pub struct DispatchHarness {
    pub clock: Arc<ManualClock>,
    pub registry: Arc<WorkerRegistry>,
    pub store: Arc<InMemoryJobStore>,
    pub encoder: Arc<FakeEncoder>,
    pub alerts: Arc<RecordingAlerts>,
    pub dispatcher: Arc<JobDispatcher>,
}

impl DispatchHarness {
    pub fn new(encoder: FakeEncoder) -> Self {
        Self::with_config(encoder, FleetConfig::default())
    }

    /// Same wiring over a [`FlakyStore`]. Read job state through the
    /// returned store; `store` on the harness is not used by the dispatcher.
    pub fn flaky(encoder: FakeEncoder, config: FleetConfig) -> (Self, Arc<FlakyStore>) {
        let flaky = Arc::new(FlakyStore::default());
        let mut harness = Self::with_config(encoder, config.clone());
        harness.dispatcher = Arc::new(JobDispatcher::new(
            harness.registry.clone(),
            flaky.clone() as Arc<dyn JobStore>,
            harness.encoder.clone(),
            harness.alerts.clone(),
            config.dispatch,
        ));
        (harness, flaky)
    }

    pub fn with_config(encoder: FakeEncoder, config: FleetConfig) -> Self {
        let clock = manual_clock();
        let registry = Arc::new(WorkerRegistry::new(clock.clone()));
        let store = Arc::new(InMemoryJobStore::with_capacity(config.max_jobs));
        let encoder = Arc::new(encoder);
        let alerts = Arc::new(RecordingAlerts::default());
        let dispatcher = Arc::new(JobDispatcher::new(
            registry.clone(),
            store.clone() as Arc<dyn JobStore>,
            encoder.clone(),
            alerts.clone(),
            config.dispatch,
        ));
        Self {
            clock,
            registry,
            store,
            encoder,
            alerts,
            dispatcher,
        }
    }
}

pub fn test_coordinator(
    config: FleetConfig,
    encoder: FakeEncoder,
    reconnector: ScriptedReconnector,
) -> (Coordinator, Arc<ManualClock>, Arc<RecordingAlerts>) {
    let clock = manual_clock();
    let alerts = Arc::new(RecordingAlerts::default());
    let coordinator = Coordinator::in_memory(
        config,
        clock.clone(),
        Arc::new(encoder),
        Arc::new(reconnector),
        alerts.clone(),
    )
    .unwrap();
    (coordinator, clock, alerts)
}
