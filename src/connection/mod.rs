//! Live-stream connection recovery.
//!
//! Each session moves `CONNECTED -> RECONNECTING -> CONNECTED | FAILED_OVER`.
//! Attempts are spaced by the configured [`BackoffPolicy`](crate::backoff::BackoffPolicy)
//! and capped by its attempt ceiling; a failed-over session stays failed over
//! until an operator resets it.

pub mod monitor;
pub mod state;

pub use monitor::{ConnectionHealthMonitor, ReconnectOutcome, Reconnector};
pub use state::{ConnectionState, ConnectionStatus};
