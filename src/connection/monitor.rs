use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::alert::AlertSink;
use crate::backoff::BackoffPolicy;
use crate::clock::Clock;
use crate::connection::state::ConnectionState;
use crate::error::{FleetError, Result};

/// Re-establishes the delivery path of a live-stream session.
#[async_trait]
pub trait Reconnector: Send + Sync {
    async fn reconnect(&self, session_id: &str, attempt: u32) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    Reconnected { attempts: u32 },
    FailedOver { attempts: u32 },
    /// Stopped by the cancellation token; state left as it was.
    Cancelled { attempts: u32 },
    /// A manual reset superseded this loop.
    Reset,
    /// Another loop already owns this session.
    InProgress,
}

enum Step {
    Attempt(u32),
    Exhausted(Option<ConnectionState>, u32),
    Superseded,
}

/// Clears the session's loop flag however the loop exits, including when
/// the owning task is dropped mid-sleep.
struct LoopGuard<'a> {
    sessions: &'a DashMap<String, ConnectionState>,
    session_id: &'a str,
}

impl Drop for LoopGuard<'_> {
    fn drop(&mut self) {
        if let Some(mut state) = self.sessions.get_mut(self.session_id) {
            state.loop_active = false;
        }
    }
}

/// Tracks live-stream sessions and runs bounded, backoff-delayed
/// reconnection for each, failing over once attempts run out.
pub struct ConnectionHealthMonitor {
    sessions: DashMap<String, ConnectionState>,
    policy: BackoffPolicy,
    reconnector: Arc<dyn Reconnector>,
    alerts: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
}

impl ConnectionHealthMonitor {
    pub fn new(
        policy: BackoffPolicy,
        reconnector: Arc<dyn Reconnector>,
        alerts: Arc<dyn AlertSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            policy,
            reconnector,
            alerts,
            clock,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    pub fn should_attempt_reconnection(&self, attempt_count: u32) -> bool {
        self.policy.should_attempt(attempt_count)
    }

    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        self.policy.calculate_delay(attempt)
    }

    /// Start tracking a session. Opening an existing session returns it
    /// unchanged.
    pub fn open_session(&self, session_id: &str) -> ConnectionState {
        let now = self.clock.now();
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::info!(session_id, "Session opened");
                ConnectionState::new(session_id, self.policy.max_attempts(), now)
            })
            .clone()
    }

    /// Mark a session as seen. Fails for failed-over sessions, which need a
    /// reset before they are usable again.
    pub fn touch(&self, session_id: &str) -> Result<()> {
        let now = self.clock.now();
        let mut state = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| FleetError::SessionNotFound(session_id.to_string()))?;
        if state.is_failed_over() {
            return Err(FleetError::ReconnectionExhausted {
                session_id: session_id.to_string(),
                attempts: state.attempt_count,
            });
        }
        state.last_seen_at = now;
        Ok(())
    }

    pub fn end_session(&self, session_id: &str) -> Option<ConnectionState> {
        let removed = self.sessions.remove(session_id).map(|(_, s)| s);
        if removed.is_some() {
            tracing::info!(session_id, "Session ended");
        }
        removed
    }

    pub fn state(&self, session_id: &str) -> Option<ConnectionState> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    pub fn sessions(&self) -> Vec<ConnectionState> {
        let mut sessions: Vec<ConnectionState> =
            self.sessions.iter().map(|s| s.clone()).collect();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        sessions
    }

    /// Operator reset: attempts back to zero, status back to CONNECTED.
    /// Any loop still running for the session stops at its next step.
    pub fn reset(&self, session_id: &str) -> Result<ConnectionState> {
        let now = self.clock.now();
        let mut state = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| FleetError::SessionNotFound(session_id.to_string()))?;
        state.reset(now);
        tracing::info!(session_id, "Session reset");
        Ok(state.clone())
    }

    /// Reconnect after a disconnect: wait the backoff delay, try, repeat
    /// until connected or out of attempts. On exhaustion the session moves to
    /// FAILED_OVER and the alert sink is told exactly once.
    pub async fn handle_disconnect(
        &self,
        session_id: &str,
        cancel: CancellationToken,
    ) -> Result<ReconnectOutcome> {
        let epoch = {
            let mut state = self
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| FleetError::SessionNotFound(session_id.to_string()))?;
            if state.loop_active {
                return Ok(ReconnectOutcome::InProgress);
            }
            if state.is_failed_over() {
                return Ok(ReconnectOutcome::FailedOver {
                    attempts: state.attempt_count,
                });
            }
            state.loop_active = true;
            state.epoch
        };
        let _guard = LoopGuard {
            sessions: &self.sessions,
            session_id,
        };

        loop {
            let step = self.next_step(session_id, epoch)?;
            let attempt = match step {
                Step::Superseded => return Ok(ReconnectOutcome::Reset),
                Step::Exhausted(newly_failed, attempts) => {
                    if let Some(state) = newly_failed {
                        tracing::warn!(session_id, attempts, "Reconnection exhausted, failing over");
                        self.alerts.connection_failed_over(&state).await;
                    }
                    return Ok(ReconnectOutcome::FailedOver { attempts });
                }
                Step::Attempt(attempt) => attempt,
            };

            let delay = self.policy.calculate_delay(attempt);
            tracing::info!(
                session_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Ok(ReconnectOutcome::Cancelled { attempts: attempt }),
                _ = tokio::time::sleep(delay) => {}
            }
            if self.superseded(session_id, epoch) {
                return Ok(ReconnectOutcome::Reset);
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return Ok(ReconnectOutcome::Cancelled { attempts: attempt }),
                result = self.reconnector.reconnect(session_id, attempt) => result,
            };

            match result {
                Ok(()) => {
                    let now = self.clock.now();
                    let mut state = self
                        .sessions
                        .get_mut(session_id)
                        .ok_or_else(|| FleetError::SessionNotFound(session_id.to_string()))?;
                    if state.epoch != epoch {
                        return Ok(ReconnectOutcome::Reset);
                    }
                    state.mark_connected(now);
                    tracing::info!(session_id, attempts = attempt, "Reconnected");
                    return Ok(ReconnectOutcome::Reconnected { attempts: attempt });
                }
                Err(e) => {
                    tracing::warn!(session_id, attempt, error = %e, "Reconnect attempt failed");
                }
            }
        }
    }

    /// Drop sessions not seen within `ttl`, skipping ones mid-reconnection.
    pub fn sweep_expired(&self, ttl: Duration) -> Vec<String> {
        let now = self.clock.now();
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        let mut expired = Vec::new();
        self.sessions.retain(|id, state| {
            let keep = state.loop_active || now - state.last_seen_at < ttl;
            if !keep {
                expired.push(id.clone());
            }
            keep
        });
        for id in &expired {
            tracing::info!(session_id = %id, "Session expired");
        }
        expired
    }

    pub async fn run_sweeper(
        self: Arc<Self>,
        interval: Duration,
        ttl: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep_expired(ttl);
                }
            }
        }
    }

    fn next_step(&self, session_id: &str, epoch: u64) -> Result<Step> {
        let now = self.clock.now();
        let mut state = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| FleetError::SessionNotFound(session_id.to_string()))?;
        if state.epoch != epoch {
            return Ok(Step::Superseded);
        }
        if !self.policy.should_attempt(state.attempt_count) {
            let newly = state.mark_failed_over(now).then(|| state.clone());
            return Ok(Step::Exhausted(newly, state.attempt_count));
        }
        Ok(Step::Attempt(state.begin_attempt(now)))
    }

    fn superseded(&self, session_id: &str, epoch: u64) -> bool {
        self.sessions
            .get(session_id)
            .map(|s| s.epoch != epoch)
            .unwrap_or(true)
    }
}

impl std::fmt::Debug for ConnectionHealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHealthMonitor")
            .field("sessions", &self.sessions.len())
            .field("policy", &self.policy)
            .finish()
    }
}
