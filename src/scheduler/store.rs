use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{FleetError, Result};
use crate::scheduler::job::{Job, JobSpec, Output, Transition};
use crate::scheduler::queue::JobQueue;
use crate::worker::Worker;

/// Durable record of jobs and workers. The engine reads and writes through
/// this trait and never embeds storage logic of its own.
///
/// Lifecycle methods apply the transition only when it matches the job's
/// current state and report whether it did; an unknown job is an error.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, spec: JobSpec, created_at: DateTime<Utc>) -> Result<Job>;

    async fn get_job(&self, id: &Uuid) -> Result<Job>;

    /// Oldest QUEUED jobs first.
    async fn queued_jobs(&self, limit: usize) -> Result<Vec<Job>>;

    async fn list_jobs(&self) -> Result<Vec<Job>>;

    async fn assign_worker(
        &self,
        id: &Uuid,
        worker_id: &str,
        load_snapshot: f64,
        at: DateTime<Utc>,
    ) -> Result<Transition>;

    async fn update_progress(&self, id: &Uuid, percent: f64) -> Result<Transition>;

    async fn complete_job(
        &self,
        id: &Uuid,
        outputs: Vec<Output>,
        at: DateTime<Utc>,
    ) -> Result<Transition>;

    async fn fail_job(&self, id: &Uuid, error: String, at: DateTime<Utc>) -> Result<Transition>;

    /// Persist a registration, heartbeat or load change.
    async fn record_worker(&self, worker: &Worker) -> Result<()>;

    async fn remove_worker(&self, id: &str) -> Result<Option<Worker>>;

    /// Every recorded worker, sorted by id, with health evaluated at `now`.
    async fn workers(&self, now: DateTime<Utc>) -> Result<Vec<Worker>>;

    async fn healthy_workers(&self, now: DateTime<Utc>) -> Result<Vec<Worker>> {
        Ok(self
            .workers(now)
            .await?
            .into_iter()
            .filter(|w| w.healthy)
            .collect())
    }

    async fn available_workers(
        &self,
        require_high_res: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<Worker>> {
        Ok(self
            .workers(now)
            .await?
            .into_iter()
            .filter(|w| w.can_take(require_high_res, now))
            .collect())
    }
}

/// Process-local [`JobStore`].
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    queue: RwLock<JobQueue>,
    workers: RwLock<HashMap<String, Worker>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            queue: RwLock::new(JobQueue::with_capacity(max_jobs)),
            workers: RwLock::new(HashMap::new()),
        }
    }

    async fn transition(
        &self,
        id: &Uuid,
        apply: impl FnOnce(&mut Job) -> bool + Send,
    ) -> Result<Transition> {
        let mut queue = self.queue.write().await;
        let job = queue.get_job_mut(id).ok_or(FleetError::JobNotFound(*id))?;
        let applied = apply(job);
        Ok(Transition {
            job: job.clone(),
            applied,
        })
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, spec: JobSpec, created_at: DateTime<Utc>) -> Result<Job> {
        self.queue
            .write()
            .await
            .add_job(spec, created_at)
            .ok_or(FleetError::QueueFull)
    }

    async fn get_job(&self, id: &Uuid) -> Result<Job> {
        self.queue
            .read()
            .await
            .get_job(id)
            .cloned()
            .ok_or(FleetError::JobNotFound(*id))
    }

    async fn queued_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        Ok(self
            .queue
            .read()
            .await
            .queued_jobs(limit)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn list_jobs(&self) -> Result<Vec<Job>> {
        Ok(self
            .queue
            .read()
            .await
            .all_jobs()
            .into_iter()
            .cloned()
            .collect())
    }

    async fn assign_worker(
        &self,
        id: &Uuid,
        worker_id: &str,
        load_snapshot: f64,
        at: DateTime<Utc>,
    ) -> Result<Transition> {
        self.transition(id, |job| job.assign(worker_id, load_snapshot, at))
            .await
    }

    async fn update_progress(&self, id: &Uuid, percent: f64) -> Result<Transition> {
        self.transition(id, |job| job.record_progress(percent)).await
    }

    async fn complete_job(
        &self,
        id: &Uuid,
        outputs: Vec<Output>,
        at: DateTime<Utc>,
    ) -> Result<Transition> {
        self.transition(id, |job| job.complete(outputs, at)).await
    }

    async fn fail_job(&self, id: &Uuid, error: String, at: DateTime<Utc>) -> Result<Transition> {
        self.transition(id, |job| job.fail(error, at)).await
    }

    async fn record_worker(&self, worker: &Worker) -> Result<()> {
        self.workers
            .write()
            .await
            .insert(worker.id.clone(), worker.clone());
        Ok(())
    }

    async fn remove_worker(&self, id: &str) -> Result<Option<Worker>> {
        Ok(self.workers.write().await.remove(id))
    }

    async fn workers(&self, now: DateTime<Utc>) -> Result<Vec<Worker>> {
        let mut workers: Vec<Worker> = self
            .workers
            .read()
            .await
            .values()
            .map(|w| {
                let mut w = w.clone();
                w.refresh_health(now);
                w
            })
            .collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(workers)
    }
}
