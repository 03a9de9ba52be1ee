use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::worker::registry::WorkerRegistry;

/// Periodically reports an in-process worker's job count to the registry.
pub struct HeartbeatSender {
    interval: Duration,
}

impl HeartbeatSender {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
        }
    }

    /// Send heartbeats until cancelled or the worker is no longer registered.
    pub async fn run(
        &self,
        registry: Arc<WorkerRegistry>,
        worker_id: String,
        current_jobs: Arc<AtomicU32>,
        cancel: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let jobs = current_jobs.load(Ordering::SeqCst);
                    if registry.heartbeat(&worker_id, jobs).is_err() {
                        // Deregistered, stop sending
                        break;
                    }
                }
            }
        }
    }
}
