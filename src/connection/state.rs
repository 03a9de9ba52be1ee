use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Connected,
    Reconnecting,
    FailedOver,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Reconnecting => write!(f, "reconnecting"),
            ConnectionStatus::FailedOver => write!(f, "failed_over"),
        }
    }
}

/// Reconnection state of one live-stream session.
///
/// `attempt_count` never exceeds `max_attempts`. `FailedOver` is terminal
/// until [`reset`](Self::reset).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub session_id: String,
    pub status: ConnectionStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_seen_at: DateTime<Utc>,
    pub failed_over_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub(crate) loop_active: bool,
    /// Bumped by every reset so an in-flight loop can tell it was superseded.
    #[serde(skip)]
    pub(crate) epoch: u64,
}

impl ConnectionState {
    pub fn new(session_id: impl Into<String>, max_attempts: u32, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            status: ConnectionStatus::Connected,
            attempt_count: 0,
            max_attempts,
            last_attempt_at: None,
            last_seen_at: now,
            failed_over_at: None,
            loop_active: false,
            epoch: 0,
        }
    }

    pub fn is_failed_over(&self) -> bool {
        self.status == ConnectionStatus::FailedOver
    }

    /// Record the start of the next attempt and return its 1-based number.
    pub(crate) fn begin_attempt(&mut self, now: DateTime<Utc>) -> u32 {
        self.attempt_count = (self.attempt_count + 1).min(self.max_attempts);
        self.status = ConnectionStatus::Reconnecting;
        self.last_attempt_at = Some(now);
        self.last_seen_at = now;
        self.attempt_count
    }

    pub(crate) fn mark_connected(&mut self, now: DateTime<Utc>) {
        self.attempt_count = 0;
        self.status = ConnectionStatus::Connected;
        self.last_seen_at = now;
    }

    /// Returns true only on the transition into `FailedOver`.
    pub(crate) fn mark_failed_over(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_failed_over() {
            return false;
        }
        self.status = ConnectionStatus::FailedOver;
        self.failed_over_at = Some(now);
        self.last_seen_at = now;
        true
    }

    pub(crate) fn reset(&mut self, now: DateTime<Utc>) {
        self.attempt_count = 0;
        self.status = ConnectionStatus::Connected;
        self.failed_over_at = None;
        self.last_seen_at = now;
        self.epoch += 1;
    }
}
