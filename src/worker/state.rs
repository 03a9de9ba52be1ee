use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Workers whose last heartbeat is this old or older are unhealthy.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::seconds(60);

/// Hardware accelerator families a worker may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceleratorKind {
    Nvenc,
    QuickSync,
    Vaapi,
    VideoToolbox,
    Amf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkerCapabilities {
    pub supports_high_res: bool,
    pub hardware_accel: bool,
    pub accelerator: Option<AcceleratorKind>,
}

impl WorkerCapabilities {
    pub fn software() -> Self {
        Self::default()
    }

    pub fn with_high_res(mut self) -> Self {
        self.supports_high_res = true;
        self
    }

    pub fn with_accelerator(mut self, kind: AcceleratorKind) -> Self {
        self.hardware_accel = true;
        self.accelerator = Some(kind);
        self
    }
}

/// A transcoding worker as seen by the registry.
///
/// `healthy` is recomputed from `last_heartbeat` whenever the registry hands
/// out a copy; it is never trusted from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    pub address: Option<String>,
    pub capabilities: WorkerCapabilities,
    pub max_capacity: u32,
    pub current_jobs: u32,
    pub healthy: bool,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        max_capacity: u32,
        capabilities: WorkerCapabilities,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            address: None,
            capabilities,
            max_capacity,
            current_jobs: 0,
            healthy: true,
            last_heartbeat: now,
            registered_at: now,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Strict boundary: a heartbeat exactly `HEARTBEAT_TIMEOUT` old is stale.
    pub fn is_healthy_at(&self, now: DateTime<Utc>) -> bool {
        now - self.last_heartbeat < HEARTBEAT_TIMEOUT
    }

    pub fn load_percent(&self) -> f64 {
        if self.max_capacity == 0 {
            return 100.0;
        }
        self.current_jobs as f64 / self.max_capacity as f64 * 100.0
    }

    pub fn remaining_capacity(&self) -> u32 {
        self.max_capacity.saturating_sub(self.current_jobs)
    }

    pub fn has_capacity(&self) -> bool {
        self.current_jobs < self.max_capacity
    }

    pub fn can_take(&self, require_high_res: bool, now: DateTime<Utc>) -> bool {
        self.is_healthy_at(now)
            && self.has_capacity()
            && (!require_high_res || self.capabilities.supports_high_res)
    }

    pub(crate) fn refresh_health(&mut self, now: DateTime<Utc>) {
        self.healthy = self.is_healthy_at(now);
    }

    /// Compare `current / max` without floating point.
    pub(crate) fn cmp_load(&self, other: &Worker) -> std::cmp::Ordering {
        let lhs = self.current_jobs as u64 * other.max_capacity as u64;
        let rhs = other.current_jobs as u64 * self.max_capacity as u64;
        lhs.cmp(&rhs)
    }
}
