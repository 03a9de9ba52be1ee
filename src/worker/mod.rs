//! Worker fleet tracking.
//!
//! - **Registry**: registration, heartbeats, health and load of every worker
//! - **Heartbeat**: periodic liveness reports for in-process workers
//! - **Encoder**: the collaborator that performs a transcode on a worker
//!
//! # Health
//!
//! A worker is healthy while its last heartbeat is younger than
//! [`HEARTBEAT_TIMEOUT`]. Nothing marks a worker unhealthy explicitly; a
//! worker that stops reporting simply ages out and is skipped by selection.
//!
//! # Selection
//!
//! [`WorkerRegistry::select_by_load`] picks the lowest `current / max` ratio
//! among healthy workers with spare capacity, breaking ties by remaining
//! slots. [`WorkerRegistry::reserve`] pairs selection with an atomic,
//! re-validating increment and retries a bounded number of times.

pub mod encoder;
pub mod heartbeat;
pub mod registry;
pub mod state;

pub use encoder::{EncodedOutput, Encoder, TranscodeRequest};
pub use heartbeat::HeartbeatSender;
pub use registry::{Reservation, WorkerRegistry};
pub use state::{AcceleratorKind, Worker, WorkerCapabilities, HEARTBEAT_TIMEOUT};
