pub mod alert;
pub mod backoff;
pub mod clock;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod media;
pub mod scheduler;
pub mod shutdown;
pub mod validator;
pub mod worker;

pub use error::{FleetError, Result};
