use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::media::{recommended_bitrate_kbps, LatencyMode, Resolution};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One completed encode variant. A job with adaptive bitrate owns several.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub resolution: Resolution,
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u32,
    pub size_bytes: u64,
    pub duration_secs: f64,
    pub storage_ref: String,
}

/// Caller-supplied description of a job to enqueue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub source: String,
    pub target_resolution: Resolution,
    pub target_bitrate_kbps: Option<u32>,
    pub latency_mode: LatencyMode,
    pub adaptive_bitrate: bool,
}

impl JobSpec {
    pub fn new(source: impl Into<String>, target_resolution: Resolution) -> Self {
        Self {
            source: source.into(),
            target_resolution,
            target_bitrate_kbps: None,
            latency_mode: LatencyMode::Normal,
            adaptive_bitrate: false,
        }
    }

    pub fn with_bitrate(mut self, kbps: u32) -> Self {
        self.target_bitrate_kbps = Some(kbps);
        self
    }

    pub fn with_latency_mode(mut self, mode: LatencyMode) -> Self {
        self.latency_mode = mode;
        self
    }

    pub fn with_adaptive_bitrate(mut self) -> Self {
        self.adaptive_bitrate = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Creation order within a store; breaks `created_at` ties.
    pub seq: u64,
    pub source: String,
    pub target_resolution: Resolution,
    pub target_bitrate_kbps: Option<u32>,
    pub latency_mode: LatencyMode,
    pub adaptive_bitrate: bool,
    pub status: JobStatus,
    pub progress: f64,
    pub assigned_worker: Option<String>,
    /// Worker load when assigned. Audit only.
    pub worker_load_snapshot: Option<f64>,
    pub outputs: Vec<Output>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(spec: JobSpec, seq: u64, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq,
            source: spec.source,
            target_resolution: spec.target_resolution,
            target_bitrate_kbps: spec.target_bitrate_kbps,
            latency_mode: spec.latency_mode,
            adaptive_bitrate: spec.adaptive_bitrate,
            status: JobStatus::Queued,
            progress: 0.0,
            assigned_worker: None,
            worker_load_snapshot: None,
            outputs: Vec::new(),
            error: None,
            created_at,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn requires_high_res(&self) -> bool {
        self.target_resolution.requires_high_res()
    }

    /// Explicit bitrate, or the advisory one for the resolution and latency mode.
    pub fn effective_bitrate_kbps(&self) -> u32 {
        self.target_bitrate_kbps
            .unwrap_or_else(|| recommended_bitrate_kbps(self.target_resolution, self.latency_mode))
    }

    /// QUEUED -> PROCESSING. Returns false in any other state.
    pub fn assign(&mut self, worker_id: &str, load_snapshot: f64, at: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Queued {
            return false;
        }
        self.status = JobStatus::Processing;
        self.assigned_worker = Some(worker_id.to_string());
        self.worker_load_snapshot = Some(load_snapshot);
        self.started_at = Some(at);
        true
    }

    /// Clamp to [0, 100] and never move backwards. Only while PROCESSING.
    pub fn record_progress(&mut self, percent: f64) -> bool {
        if self.status != JobStatus::Processing || percent.is_nan() {
            return false;
        }
        self.progress = self.progress.max(percent.clamp(0.0, 100.0));
        true
    }

    /// PROCESSING -> COMPLETED.
    pub fn complete(&mut self, outputs: Vec<Output>, at: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        self.status = JobStatus::Completed;
        self.outputs = outputs;
        self.progress = 100.0;
        self.completed_at = Some(at);
        true
    }

    /// PROCESSING -> FAILED.
    pub fn fail(&mut self, error: impl Into<String>, at: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(at);
        true
    }
}

/// Result of asking the store to apply a lifecycle transition. A transition
/// that doesn't match the job's state is a no-op, not an error.
#[derive(Debug, Clone)]
pub struct Transition {
    pub job: Job,
    pub applied: bool,
}
