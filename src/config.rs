use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::error::{FleetError, Result};
use crate::scheduler::queue::DEFAULT_MAX_JOBS;

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Pause between dispatch cycles.
    pub interval: Duration,
    /// Queued jobs pulled per cycle.
    pub batch_limit: usize,
    /// Selections tried per job before it stays queued for the next cycle.
    pub assignment_retry_limit: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            batch_limit: 32,
            assignment_retry_limit: 3,
        }
    }
}

/// Live-stream session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub reconnect: BackoffPolicy,
    /// Sessions untouched for this long are swept.
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect: BackoffPolicy::default(),
            ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub dispatch: DispatchConfig,
    pub sessions: SessionConfig,
    pub max_jobs: usize,
    /// How often the coordinator logs workers that stopped heartbeating.
    pub health_sweep_interval: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            sessions: SessionConfig::default(),
            max_jobs: DEFAULT_MAX_JOBS,
            health_sweep_interval: Duration::from_secs(15),
        }
    }
}

impl FleetConfig {
    pub fn with_dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch.interval = interval;
        self
    }

    pub fn with_batch_limit(mut self, batch_limit: usize) -> Self {
        self.dispatch.batch_limit = batch_limit;
        self
    }

    pub fn with_assignment_retry_limit(mut self, limit: u32) -> Self {
        self.dispatch.assignment_retry_limit = limit;
        self
    }

    pub fn with_reconnect(mut self, policy: BackoffPolicy) -> Self {
        self.sessions.reconnect = policy;
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.sessions.ttl = ttl;
        self
    }

    pub fn with_max_jobs(mut self, max_jobs: usize) -> Self {
        self.max_jobs = max_jobs;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.dispatch.interval.is_zero() {
            return Err(FleetError::InvalidConfig(
                "dispatch interval must be positive".to_string(),
            ));
        }
        if self.dispatch.batch_limit == 0 {
            return Err(FleetError::InvalidConfig(
                "dispatch batch limit must be at least 1".to_string(),
            ));
        }
        if self.dispatch.assignment_retry_limit == 0 {
            return Err(FleetError::InvalidConfig(
                "assignment retry limit must be at least 1".to_string(),
            ));
        }
        if self.max_jobs == 0 {
            return Err(FleetError::InvalidConfig(
                "job queue capacity must be at least 1".to_string(),
            ));
        }
        if self.sessions.sweep_interval.is_zero() || self.health_sweep_interval.is_zero() {
            return Err(FleetError::InvalidConfig(
                "sweep intervals must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
