use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::media::{LatencyMode, Resolution};

/// One encode of one variant, handed to the encoder collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeRequest {
    pub job_id: Uuid,
    pub worker_id: String,
    pub input_ref: String,
    pub resolution: Resolution,
    pub bitrate_kbps: u32,
    pub latency_mode: LatencyMode,
}

/// What the encoder produced for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedOutput {
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u32,
    pub size_bytes: u64,
    pub duration_secs: f64,
    pub storage_ref: String,
}

/// Runs the actual transcode. Errors are recorded verbatim on the job.
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn transcode(&self, request: &TranscodeRequest) -> Result<EncodedOutput>;
}
