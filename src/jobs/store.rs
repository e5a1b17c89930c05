//! Job persistence seam.
//!
//! [`JobStore`] is the only place job records live. Every mutation goes
//! through [`JobStore::update`], which runs a transition on a copy of the
//! record and publishes the copy only if the transition succeeds. Readers
//! therefore see either the old record or the new one, never a half-applied
//! change.

use super::types::{Job, JobId, TransitionError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Why an update was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error(transparent)]
    Rejected(#[from] TransitionError),
}

/// A state transition applied by [`JobStore::update`].
pub type Transition<'a> = &'a mut dyn FnMut(&mut Job) -> Result<(), TransitionError>;

/// Storage for job records.
pub trait JobStore: Send + Sync {
    fn insert(&self, job: Job);

    /// Snapshot of one job.
    fn get(&self, id: JobId) -> Option<Job>;

    /// Snapshot of every job, in no particular order.
    fn list(&self) -> Vec<Job>;

    /// Apply `transition` atomically with respect to other updates of the
    /// same job. Returns the committed record.
    fn update(&self, id: JobId, transition: Transition<'_>) -> Result<Job, StoreError>;
}

/// Process-local, non-persistent store.
///
/// The outer map lock is held only to find or add a record; each record has
/// its own lock so updates to different jobs do not contend.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Arc<RwLock<Job>>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    fn record(&self, id: JobId) -> Option<Arc<RwLock<Job>>> {
        self.jobs.read().get(&id).cloned()
    }
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, job: Job) {
        self.jobs
            .write()
            .insert(job.id(), Arc::new(RwLock::new(job)));
    }

    fn get(&self, id: JobId) -> Option<Job> {
        self.record(id).map(|r| r.read().clone())
    }

    fn list(&self) -> Vec<Job> {
        let records: Vec<_> = self.jobs.read().values().cloned().collect();
        records.iter().map(|r| r.read().clone()).collect()
    }

    fn update(&self, id: JobId, transition: Transition<'_>) -> Result<Job, StoreError> {
        let record = self.record(id).ok_or(StoreError::NotFound(id))?;
        let mut guard = record.write();
        let mut next = guard.clone();
        transition(&mut next)?;
        *guard = next.clone();
        Ok(next)
    }
}
