pub mod dispatcher;
pub mod job;
pub mod queue;
pub mod store;

pub use dispatcher::{DispatchReport, JobDispatcher};
pub use job::{Job, JobSpec, JobStatus, Output, Transition};
pub use queue::JobQueue;
pub use store::{InMemoryJobStore, JobStore};
