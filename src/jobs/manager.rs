//! Job submission, background execution, and status reads.
//!
//! ## Lifecycle
//!
//! ```text
//! submit_bytes / submit_url
//!        │  stage input, insert `queued` record
//!        ▼
//! create_job ──spawn──▶ run_job
//!                         │ wait for a permit (still `queued`)
//!                         │ queued → processing   (exactly one worker wins)
//!                         │ fetch URL, detect format, route, convert
//!                         ▼
//!                    completed | failed            (staged input removed)
//! ```
//!
//! Submission never waits for conversion. Conversion errors, empty output,
//! and panics all end as a `failed` record with a non-empty message and an
//! [`ErrorKind`](crate::ErrorKind); nothing is thrown at pollers.

use super::store::{InMemoryJobStore, JobStore, StoreError};
use super::types::{Job, JobFailure, JobId, JobInput, JobState};
use crate::config::{ConversionMode, ServiceConfig};
use crate::converter::router::ConverterRouter;
use crate::converter::{ConversionResult, DocumentFormat};
use crate::error::{JobError, MarkifyError};
use crate::pipeline::input;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Front door for asynchronous conversions. Cheap to clone.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn JobStore>,
    router: ConverterRouter,
    config: ServiceConfig,
    permits: Arc<Semaphore>,
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("router", &self.inner.router)
            .field("config", &self.inner.config)
            .field("available_permits", &self.inner.permits.available_permits())
            .finish()
    }
}

impl JobManager {
    pub fn new(store: Arc<dyn JobStore>, router: ConverterRouter, config: ServiceConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            inner: Arc::new(Inner {
                store,
                router,
                config,
                permits,
            }),
        }
    }

    /// Manager backed by a fresh [`InMemoryJobStore`].
    pub fn in_memory(router: ConverterRouter, config: ServiceConfig) -> Self {
        Self::new(Arc::new(InMemoryJobStore::new()), router, config)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn router(&self) -> &ConverterRouter {
        &self.inner.router
    }

    // ── Submission ───────────────────────────────────────────────────────

    /// Stage uploaded bytes and start a job for them.
    pub async fn submit_bytes(
        &self,
        filename: &str,
        bytes: &[u8],
        mode: ConversionMode,
    ) -> Result<JobId, MarkifyError> {
        if bytes.is_empty() {
            return Err(MarkifyError::EmptyPayload {
                filename: filename.to_string(),
            });
        }
        let original_name = if filename.trim().is_empty() {
            input::FALLBACK_FILENAME.to_string()
        } else {
            filename.to_string()
        };

        let job_id = JobId::new();
        let path = input::stage_bytes(&self.job_dir(job_id), &original_name, bytes).await?;
        let job = Job::with_id(
            job_id,
            JobInput::Staged {
                path,
                original_name,
            },
            mode,
        );
        Ok(self.enqueue(job))
    }

    /// Start a job that fetches `url` when it begins processing.
    pub fn submit_url(&self, url: &str, mode: ConversionMode) -> Result<JobId, MarkifyError> {
        let parsed = input::parse_url(url)?;
        Ok(self.create_job(
            JobInput::Url {
                url: parsed.to_string(),
            },
            mode,
        ))
    }

    /// Record a `queued` job and schedule it in the background.
    pub fn create_job(&self, input: JobInput, mode: ConversionMode) -> JobId {
        self.enqueue(Job::new(input, mode))
    }

    fn enqueue(&self, job: Job) -> JobId {
        let id = job.id();
        info!(job_id = %id, mode = %job.mode(), source = job.input().display_name(), "Job queued");
        self.inner.store.insert(job);

        let this = self.clone();
        tokio::spawn(async move { this.run_job(id).await });
        id
    }

    // ── Execution ────────────────────────────────────────────────────────

    /// Drive one job to a terminal state.
    ///
    /// A no-op for unknown jobs and for jobs another worker has already
    /// started or finished.
    pub async fn run_job(&self, id: JobId) {
        match self.inner.store.get(id).map(|j| j.state()) {
            Some(JobState::Queued) => {}
            Some(state) => {
                debug!(job_id = %id, %state, "Job already claimed");
                return;
            }
            None => {
                warn!(job_id = %id, "run_job on unknown job");
                return;
            }
        }

        let Ok(_permit) = Arc::clone(&self.inner.permits).acquire_owned().await else {
            warn!(job_id = %id, "Job semaphore closed");
            return;
        };

        let begun = self.inner.store.update(id, &mut |j| j.begin());
        let job = match begun {
            Ok(job) => job,
            Err(StoreError::Rejected(e)) => {
                debug!(job_id = %id, error = %e, "Job already claimed");
                return;
            }
            Err(StoreError::NotFound(_)) => return,
        };
        info!(job_id = %id, mode = %job.mode(), "Job processing");
        let started = Instant::now();

        let this = self.clone();
        let worker = job.clone();
        let outcome = match tokio::spawn(async move { this.execute(&worker).await }).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(JobFailure::from(&e)),
            Err(join) => Err(JobFailure::new(
                crate::error::ErrorKind::Internal,
                panic_message(join),
            )),
        };

        let committed = match &outcome {
            Ok(result) => self
                .inner
                .store
                .update(id, &mut |j| j.complete(result.clone())),
            Err(failure) => self.inner.store.update(id, &mut |j| j.fail(failure.clone())),
        };
        if let Err(e) = committed {
            warn!(job_id = %id, error = %e, "Could not record job outcome");
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(result) => info!(
                job_id = %id,
                chars = result.text_content.len(),
                elapsed_ms,
                "Job completed"
            ),
            Err(failure) => warn!(
                job_id = %id,
                kind = %failure.kind,
                error = %failure.message,
                elapsed_ms,
                "Job failed"
            ),
        }

        self.remove_staging(id).await;
    }

    async fn execute(&self, job: &Job) -> Result<ConversionResult, MarkifyError> {
        let path = match job.input() {
            JobInput::Staged { path, .. } => path.clone(),
            JobInput::Url { url } => {
                input::fetch_url(url, &self.job_dir(job.id()), self.inner.config.fetch_timeout_secs)
                    .await?
            }
        };

        let format = DocumentFormat::detect(&path).await;
        debug!(job_id = %job.id(), %format, path = %path.display(), "Detected input format");

        let result = self.inner.router.convert(job.mode(), &path, format).await?;
        if result.text_content.trim().is_empty() {
            return Err(MarkifyError::EmptyOutput { path });
        }
        Ok(result)
    }

    fn job_dir(&self, id: JobId) -> PathBuf {
        self.inner.config.staging_dir.join(id.to_string())
    }

    async fn remove_staging(&self, id: JobId) {
        let dir = self.job_dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(job_id = %id, dir = %dir.display(), "Removed staged input"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(job_id = %id, dir = %dir.display(), error = %e, "Could not remove staged input"),
        }
    }

    // ── Reads ────────────────────────────────────────────────────────────

    pub fn get_job(&self, id: JobId) -> Result<Job, JobError> {
        self.inner.store.get(id).ok_or_else(|| JobError::NotFound {
            id: id.to_string(),
        })
    }

    pub fn get_status(&self, id: JobId) -> Result<JobState, JobError> {
        self.get_job(id).map(|j| j.state())
    }

    /// The finished Markdown. Fails while the job is still running and for
    /// failed jobs.
    pub fn get_result(&self, id: JobId) -> Result<ConversionResult, JobError> {
        let job = self.get_job(id)?;
        if let Some(result) = job.result() {
            return Ok(result.clone());
        }
        match job.error() {
            Some(failure) => Err(JobError::NoResult {
                id: id.to_string(),
                reason: failure.message.clone(),
            }),
            None => Err(JobError::NotReady {
                id: id.to_string(),
                status: job.state().to_string(),
            }),
        }
    }

    /// Every job, newest first.
    pub fn list_jobs(&self) -> Vec<Job> {
        let mut jobs = self.inner.store.list();
        jobs.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        jobs
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return format!("conversion task was cancelled: {err}");
    }
    let payload = err.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("conversion task panicked: {detail}")
}
