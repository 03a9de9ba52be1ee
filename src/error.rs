use thiserror::Error;
use uuid::Uuid;

use crate::media::Resolution;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("No worker available (high resolution required: {require_high_res})")]
    WorkerUnavailable { require_high_res: bool },

    #[error("Worker {0} filled up between selection and reservation")]
    AssignmentRace(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Invalid output {width}x{height} for target {target}")]
    InvalidOutput {
        width: u32,
        height: u32,
        target: Resolution,
    },

    #[error("Reconnection exhausted for session {session_id} after {attempts} attempts")]
    ReconnectionExhausted { session_id: String, attempts: u32 },

    #[error("Job queue at capacity")]
    QueueFull,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FleetError {
    /// Scheduling conditions that are recovered by leaving work queued.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FleetError::WorkerUnavailable { .. } | FleetError::AssignmentRace(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
