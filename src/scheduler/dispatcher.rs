use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::alert::AlertSink;
use crate::config::DispatchConfig;
use crate::error::{FleetError, Result};
use crate::media::{abr_ladder, recommended_bitrate_kbps};
use crate::scheduler::job::{Job, JobSpec, JobStatus, Output, Transition};
use crate::scheduler::store::JobStore;
use crate::validator::OutputValidator;
use crate::worker::{Encoder, TranscodeRequest, WorkerRegistry};

/// Outcome of one dispatch cycle.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DispatchReport {
    /// (job, worker) pairs that moved to PROCESSING.
    pub assigned: Vec<(Uuid, String)>,
    /// Jobs left QUEUED because no worker could take them.
    pub deferred: usize,
}

/// Places queued jobs on workers and drives them to a terminal state.
///
/// A job is owned by exactly one worker from assignment until it completes
/// or fails. The dispatcher never moves a job to another worker and never
/// re-queues a failed one.
pub struct JobDispatcher {
    registry: Arc<WorkerRegistry>,
    store: Arc<dyn JobStore>,
    encoder: Arc<dyn Encoder>,
    alerts: Arc<dyn AlertSink>,
    validator: OutputValidator,
    config: DispatchConfig,
}

impl JobDispatcher {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        store: Arc<dyn JobStore>,
        encoder: Arc<dyn Encoder>,
        alerts: Arc<dyn AlertSink>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            store,
            encoder,
            alerts,
            validator: OutputValidator::new(),
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub async fn submit(&self, spec: JobSpec) -> Result<Job> {
        let job = self.store.create_job(spec, self.registry.now()).await?;
        tracing::info!(
            job_id = %job.id,
            resolution = %job.target_resolution,
            adaptive = job.adaptive_bitrate,
            "Job queued"
        );
        Ok(job)
    }

    /// Assign the oldest queued jobs, up to the batch limit.
    pub async fn dispatch_cycle(&self) -> Result<DispatchReport> {
        let queued = self.store.queued_jobs(self.config.batch_limit).await?;
        let mut report = DispatchReport::default();

        for job in queued {
            let reservation = match self
                .registry
                .reserve(job.requires_high_res(), self.config.assignment_retry_limit)
            {
                Ok(reservation) => reservation,
                Err(e) => {
                    if e.is_transient() {
                        tracing::debug!(job_id = %job.id, reason = %e, "Job left queued");
                    } else {
                        tracing::warn!(job_id = %job.id, error = %e, "Worker reservation failed");
                    }
                    report.deferred += 1;
                    continue;
                }
            };

            let assigned = self
                .store
                .assign_worker(
                    &job.id,
                    &reservation.worker_id,
                    reservation.load_snapshot,
                    self.registry.now(),
                )
                .await;
            match assigned {
                Ok(t) if t.applied => {
                    tracing::info!(
                        job_id = %job.id,
                        worker_id = %reservation.worker_id,
                        load = reservation.load_snapshot,
                        "Job assigned"
                    );
                    self.sync_worker(&reservation.worker_id).await;
                    report.assigned.push((job.id, reservation.worker_id));
                }
                Ok(t) => {
                    tracing::debug!(job_id = %job.id, status = %t.job.status, "Job no longer queued");
                    self.release(&reservation.worker_id).await;
                }
                Err(e) => {
                    // Jobs already assigned in this batch must still reach `run`.
                    tracing::warn!(
                        job_id = %job.id,
                        worker_id = %reservation.worker_id,
                        error = %e,
                        "Could not record assignment, job left queued"
                    );
                    self.release(&reservation.worker_id).await;
                    report.deferred += 1;
                }
            }
        }

        if !report.assigned.is_empty() || report.deferred > 0 {
            tracing::debug!(
                assigned = report.assigned.len(),
                deferred = report.deferred,
                "Dispatch cycle finished"
            );
        }
        Ok(report)
    }

    /// Best-effort progress telemetry; clamped and never moves backwards.
    pub async fn report_progress(&self, job_id: &Uuid, percent: f64) -> Result<Transition> {
        self.store.update_progress(job_id, percent).await
    }

    pub async fn complete(&self, job_id: &Uuid, outputs: Vec<Output>) -> Result<Transition> {
        let t = self
            .store
            .complete_job(job_id, outputs, self.registry.now())
            .await?;
        if t.applied {
            tracing::info!(
                job_id = %job_id,
                outputs = t.job.outputs.len(),
                "Job completed"
            );
            self.release_for(&t.job).await;
        }
        Ok(t)
    }

    pub async fn fail(&self, job_id: &Uuid, error: impl Into<String>) -> Result<Transition> {
        let t = self
            .store
            .fail_job(job_id, error.into(), self.registry.now())
            .await?;
        if t.applied {
            self.release_for(&t.job).await;
            self.alerts.job_failed(&t.job).await;
        }
        Ok(t)
    }

    /// Run an assigned job through the encoder: one encode per ABR rung (or
    /// just the target), each output validated before the job completes.
    pub async fn execute(&self, job_id: Uuid) -> Result<Job> {
        let job = self.store.get_job(&job_id).await?;
        if job.status != JobStatus::Processing {
            return Ok(job);
        }
        let worker_id = job
            .assigned_worker
            .clone()
            .ok_or_else(|| FleetError::Internal(format!("job {} has no worker", job_id)))?;

        let rungs = if job.adaptive_bitrate {
            abr_ladder(job.target_resolution)
        } else {
            vec![job.target_resolution]
        };
        let total = rungs.len();
        let mut outputs = Vec::with_capacity(total);

        for (index, resolution) in rungs.into_iter().enumerate() {
            let bitrate_kbps = if resolution == job.target_resolution {
                job.effective_bitrate_kbps()
            } else {
                recommended_bitrate_kbps(resolution, job.latency_mode)
            };
            let request = TranscodeRequest {
                job_id,
                worker_id: worker_id.clone(),
                input_ref: job.source.clone(),
                resolution,
                bitrate_kbps,
                latency_mode: job.latency_mode,
            };

            let encoded = match self.encoder.transcode(&request).await {
                Ok(encoded) => encoded,
                Err(e) => {
                    let message = match e {
                        FleetError::EncodingFailed(message) => message,
                        other => other.to_string(),
                    };
                    return self.fail_or_release(job_id, &worker_id, message).await;
                }
            };

            if let Err(e) = self
                .validator
                .check(encoded.width, encoded.height, resolution)
            {
                tracing::warn!(job_id = %job_id, error = %e, "Rejected encoder output");
                return self
                    .fail_or_release(job_id, &worker_id, e.to_string())
                    .await;
            }

            outputs.push(Output {
                resolution,
                width: encoded.width,
                height: encoded.height,
                bitrate_kbps: encoded.bitrate_kbps,
                size_bytes: encoded.size_bytes,
                duration_secs: encoded.duration_secs,
                storage_ref: encoded.storage_ref,
            });

            if index + 1 < total {
                let percent = (index + 1) as f64 / total as f64 * 100.0;
                if let Err(e) = self.report_progress(&job_id, percent).await {
                    tracing::warn!(job_id = %job_id, percent, error = %e, "Progress update dropped");
                }
            }
        }

        match self.complete(&job_id, outputs).await {
            Ok(t) => Ok(t.job),
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Could not record completion");
                let message = format!("could not record outputs: {}", e);
                self.fail_or_release(job_id, &worker_id, message).await
            }
        }
    }

    /// Fail the job. The worker slot is released even when the failure
    /// cannot be recorded.
    async fn fail_or_release(
        &self,
        job_id: Uuid,
        worker_id: &str,
        message: String,
    ) -> Result<Job> {
        match self.fail(&job_id, message).await {
            Ok(t) => Ok(t.job),
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Could not record job failure");
                self.release(worker_id).await;
                Err(e)
            }
        }
    }

    /// Poll for queued jobs until cancelled. Assigned jobs are executed
    /// concurrently; in-flight executions are drained before returning.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval);
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    match self.dispatch_cycle().await {
                        Ok(report) => {
                            for (job_id, _) in report.assigned {
                                let dispatcher = self.clone();
                                in_flight.spawn(async move {
                                    if let Err(e) = dispatcher.execute(job_id).await {
                                        tracing::warn!(job_id = %job_id, error = %e, "Job execution aborted");
                                    }
                                });
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "Dispatch cycle failed"),
                    }
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Job execution task panicked");
                    }
                }
            }
        }

        if !in_flight.is_empty() {
            tracing::info!(in_flight = in_flight.len(), "Draining job executions");
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Job execution task panicked");
            }
        }
    }

    async fn release_for(&self, job: &Job) {
        if let Some(worker_id) = job.assigned_worker.as_deref() {
            self.release(worker_id).await;
        }
    }

    async fn release(&self, worker_id: &str) {
        match self.registry.decrement_load(worker_id) {
            Ok(_) => self.sync_worker(worker_id).await,
            Err(e) => tracing::warn!(worker_id, error = %e, "Could not release worker slot"),
        }
    }

    /// Mirror the registry's view of one worker into the store.
    async fn sync_worker(&self, worker_id: &str) {
        let Some(worker) = self.registry.get(worker_id) else {
            return;
        };
        if let Err(e) = self.store.record_worker(&worker).await {
            tracing::warn!(worker_id, error = %e, "Could not record worker load");
        }
    }
}
