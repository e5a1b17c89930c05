//! Job records and their state machine.
//!
//! ```text
//! queued ──▶ processing ──▶ completed
//!                      └──▶ failed
//! ```
//!
//! The result and the error live inside the terminal state itself, so a job
//! can never hold both, and neither exists before the job finishes.

use crate::config::ConversionMode;
use crate::converter::ConversionResult;
use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ── JobId ────────────────────────────────────────────────────────────────────

/// Opaque job identifier (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ── JobState ─────────────────────────────────────────────────────────────────

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An illegal state change was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal job transition {from} → {to}")]
pub struct TransitionError {
    pub from: JobState,
    pub to: JobState,
}

// ── Input and failure ────────────────────────────────────────────────────────

/// Where the job's document comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JobInput {
    /// Bytes already written to the staging area.
    Staged {
        path: PathBuf,
        original_name: String,
    },
    /// Fetched at the start of processing.
    Url { url: String },
}

impl JobInput {
    /// Name shown to users: the upload's filename or the URL.
    pub fn display_name(&self) -> &str {
        match self {
            JobInput::Staged { original_name, .. } => original_name,
            JobInput::Url { url } => url,
        }
    }
}

/// Error recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobFailure {
    /// An empty message is replaced with the kind so a failure is never blank.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            format!("job failed ({kind})")
        } else {
            message
        };
        Self { kind, message }
    }
}

impl From<&crate::error::MarkifyError> for JobFailure {
    fn from(e: &crate::error::MarkifyError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

// ── Job ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Phase {
    Queued,
    Processing,
    Completed(ConversionResult),
    Failed(JobFailure),
}

/// One conversion request and everything known about it.
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    mode: ConversionMode,
    input: JobInput,
    phase: Phase,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A fresh `queued` job.
    pub fn new(input: JobInput, mode: ConversionMode) -> Self {
        Self::with_id(JobId::new(), input, mode)
    }

    /// A `queued` job with a caller-chosen id (used when the input is
    /// staged under the id before the record exists).
    pub fn with_id(id: JobId, input: JobInput, mode: ConversionMode) -> Self {
        Self {
            id,
            mode,
            input,
            phase: Phase::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn mode(&self) -> ConversionMode {
        self.mode
    }

    pub fn input(&self) -> &JobInput {
        &self.input
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn state(&self) -> JobState {
        match self.phase {
            Phase::Queued => JobState::Queued,
            Phase::Processing => JobState::Processing,
            Phase::Completed(_) => JobState::Completed,
            Phase::Failed(_) => JobState::Failed,
        }
    }

    /// The result, only for completed jobs.
    pub fn result(&self) -> Option<&ConversionResult> {
        match &self.phase {
            Phase::Completed(r) => Some(r),
            _ => None,
        }
    }

    /// The failure, only for failed jobs.
    pub fn error(&self) -> Option<&JobFailure> {
        match &self.phase {
            Phase::Failed(f) => Some(f),
            _ => None,
        }
    }

    /// `queued → processing`.
    pub fn begin(&mut self) -> Result<(), TransitionError> {
        self.require(JobState::Queued, JobState::Processing)?;
        self.phase = Phase::Processing;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// `processing → completed`.
    pub fn complete(&mut self, result: ConversionResult) -> Result<(), TransitionError> {
        self.require(JobState::Processing, JobState::Completed)?;
        self.phase = Phase::Completed(result);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// `processing → failed`.
    pub fn fail(&mut self, failure: JobFailure) -> Result<(), TransitionError> {
        self.require(JobState::Processing, JobState::Failed)?;
        self.phase = Phase::Failed(failure);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    fn require(&self, from: JobState, to: JobState) -> Result<(), TransitionError> {
        let current = self.state();
        if current == from {
            Ok(())
        } else {
            Err(TransitionError { from: current, to })
        }
    }

    /// Serialisable snapshot without the Markdown body.
    pub fn view(&self) -> JobView {
        let (filename, url) = match &self.input {
            JobInput::Staged { original_name, .. } => (Some(original_name.clone()), None),
            JobInput::Url { url } => (None, Some(url.clone())),
        };
        JobView {
            job_id: self.id,
            status: self.state(),
            mode: self.mode,
            filename,
            url,
            title: self.result().and_then(|r| r.title.clone()),
            error: self.error().map(|f| f.message.clone()),
            error_kind: self.error().map(|f| f.kind),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// JSON shape of a job in the HTTP API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: JobId,
    pub status: JobState,
    pub mode: ConversionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}
