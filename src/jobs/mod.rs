//! Asynchronous conversion jobs.
//!
//! - [`types`]: the job record and its state machine
//! - [`store`]: the [`JobStore`] seam and the in-memory implementation
//! - [`manager`]: submission, background execution, and reads

pub mod manager;
pub mod store;
pub mod types;

pub use manager::JobManager;
pub use store::{InMemoryJobStore, JobStore, StoreError};
pub use types::{Job, JobFailure, JobId, JobInput, JobState, JobView, TransitionError};
