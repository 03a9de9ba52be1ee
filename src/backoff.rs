//! Exponential backoff and bounded retry helpers.
//!
//! [`BackoffPolicy`] drives the live-stream reconnection loop: the delay for
//! attempt `n` (1-based) is `initial_delay * multiplier^(n-1)`, capped at
//! `max_delay`, and at most `max_attempts` attempts are made.
//!
//! [`BoundedRetry`] is the explicit loop used for optimistic retries (worker
//! reservation races). It never recurses and always terminates.

use std::ops::ControlFlow;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBackoffPolicy")]
pub struct BackoffPolicy {
    initial_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    max_attempts: u32,
}

/// Unchecked wire form; every deserialized policy goes through
/// [`BackoffPolicy::new`].
#[derive(Deserialize)]
struct RawBackoffPolicy {
    initial_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    max_attempts: u32,
}

impl TryFrom<RawBackoffPolicy> for BackoffPolicy {
    type Error = FleetError;

    fn try_from(raw: RawBackoffPolicy) -> Result<Self> {
        Self::new(
            raw.initial_delay,
            raw.multiplier,
            raw.max_delay,
            raw.max_attempts,
        )
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl BackoffPolicy {
    /// Build a policy, rejecting parameters that would make delays zero,
    /// shrinking, or uncapped below the first delay.
    pub fn new(
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
        max_attempts: u32,
    ) -> Result<Self> {
        if initial_delay.is_zero() {
            return Err(FleetError::InvalidConfig(
                "initial delay must be positive".to_string(),
            ));
        }
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(FleetError::InvalidConfig(format!(
                "backoff multiplier must be >= 1.0, got {}",
                multiplier
            )));
        }
        if max_delay < initial_delay {
            return Err(FleetError::InvalidConfig(format!(
                "max delay {:?} is below initial delay {:?}",
                max_delay, initial_delay
            )));
        }
        if max_attempts == 0 {
            return Err(FleetError::InvalidConfig(
                "max attempts must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            initial_delay,
            multiplier,
            max_delay,
            max_attempts,
        })
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// True while `attempt_count` (attempts already made) is below the ceiling.
    pub fn should_attempt(&self, attempt_count: u32) -> bool {
        attempt_count < self.max_attempts
    }

    /// Delay before the given 1-based attempt. Attempt 0 is treated as 1.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.initial_delay;
        }
        let exponent = (attempt - 1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs).max(self.initial_delay)
    }

    /// All delays the policy will ever produce, in attempt order.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_attempts)
            .map(|attempt| self.calculate_delay(attempt))
            .collect()
    }
}

/// Explicit bounded retry loop carrying the attempt number.
#[derive(Debug, Clone, Copy)]
pub struct BoundedRetry {
    max_tries: u32,
}

impl BoundedRetry {
    pub fn new(max_tries: u32) -> Self {
        Self {
            max_tries: max_tries.max(1),
        }
    }

    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    /// Run `op` with 1-based try numbers until it breaks with a value or the
    /// tries run out.
    pub fn run<T>(&self, mut op: impl FnMut(u32) -> ControlFlow<T>) -> Option<T> {
        for attempt in 1..=self.max_tries {
            if let ControlFlow::Break(value) = op(attempt) {
                return Some(value);
            }
        }
        None
    }
}
