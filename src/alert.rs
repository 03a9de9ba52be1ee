//! Failover and alerting collaborator.

use async_trait::async_trait;

use crate::connection::ConnectionState;
use crate::scheduler::Job;

#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Called exactly once when a session's reconnection attempts run out.
    async fn connection_failed_over(&self, state: &ConnectionState);

    /// Called when a job reaches FAILED.
    async fn job_failed(&self, _job: &Job) {}
}

/// Alert sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn connection_failed_over(&self, state: &ConnectionState) {
        tracing::error!(
            session_id = %state.session_id,
            attempts = state.attempt_count,
            "Connection failed over"
        );
    }

    async fn job_failed(&self, job: &Job) {
        tracing::warn!(
            job_id = %job.id,
            worker_id = ?job.assigned_worker,
            error = ?job.error,
            "Job failed"
        );
    }
}
