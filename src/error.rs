//! Error types for the markify library.
//!
//! Two distinct error types reflect two distinct audiences:
//!
//! * [`MarkifyError`]: a submission, dispatch, or conversion failure. The
//!   synchronous path (CLI, [`crate::ConverterRouter::convert`]) returns it
//!   directly; the job path records it on the failed job as a message plus
//!   an [`ErrorKind`].
//!
//! * [`JobError`]: a lookup against the job store failed (unknown id, job
//!   not finished yet, job failed). These never describe the document
//!   itself, only the state of the job.
//!
//! [`ErrorKind`] is the stable, serialisable tag callers branch on. The
//! message text is for humans and may change.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the markify library.
#[derive(Debug, Error)]
pub enum MarkifyError {
    // ── Submission errors ─────────────────────────────────────────────────
    /// An upload carried no bytes.
    #[error("Uploaded file '{filename}' is empty")]
    EmptyPayload { filename: String },

    /// The input string is not a usable file path or HTTP/HTTPS URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// Local input file was not found.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    // ── Dispatch errors ───────────────────────────────────────────────────
    /// The requested mode is unknown or has no registered converter.
    #[error("Unsupported conversion mode '{mode}' (expected one of: simple, advanced, cloud)")]
    UnsupportedMode { mode: String },

    /// The selected converter does not handle this input format.
    #[error("The {converter} converter does not support {format} input")]
    UnsupportedFormat { converter: String, format: String },

    // ── Backend errors ────────────────────────────────────────────────────
    /// The layout/OCR backend is not installed or cannot be started.
    #[error(
        "Advanced conversion backend is unavailable: {reason}\n\n\
The advanced mode runs the MinerU `magic-pdf` command. You can:\n\
  • Install it with: pip install -U \"magic-pdf[full]\"\n\
  • Point markify at an existing copy with --magic-pdf /path/to/magic-pdf\n"
    )]
    BackendUnavailable { reason: String },

    /// The backend started but failed while processing the document.
    #[error("Advanced conversion backend failed: {detail}")]
    BackendFailed { detail: String },

    /// The backend exceeded its time budget.
    #[error("Advanced conversion backend timed out after {secs}s")]
    BackendTimeout { secs: u64 },

    /// A mode that exists but has no implementation yet.
    #[error("{feature} is not implemented yet")]
    NotImplemented { feature: String },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// The converter ran and the underlying extractor raised.
    #[error("{converter} conversion failed: {detail}")]
    ConversionFailed { converter: String, detail: String },

    /// The file claims to be a PDF but is not one.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: Vec<u8> },

    /// The converter produced no text at all.
    #[error("Conversion of '{path}' produced no text")]
    EmptyOutput { path: PathBuf },

    // ── Provisioning errors ───────────────────────────────────────────────
    /// A model could not be downloaded or the runtime configuration written.
    #[error("Model provisioning failed for '{model}': {detail}")]
    ModelProvisioning { model: String, detail: String },

    // ── Fetch errors ──────────────────────────────────────────────────────
    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --fetch-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output or staging file.
    #[error("Failed to write '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MarkifyError {
    /// Stable classification recorded on failed jobs.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MarkifyError::EmptyPayload { .. }
            | MarkifyError::InvalidInput { .. }
            | MarkifyError::FileNotFound { .. } => ErrorKind::InvalidSubmission,
            MarkifyError::UnsupportedMode { .. } => ErrorKind::UnsupportedMode,
            MarkifyError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            MarkifyError::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            MarkifyError::NotImplemented { .. } => ErrorKind::NotImplemented,
            MarkifyError::BackendFailed { .. }
            | MarkifyError::BackendTimeout { .. }
            | MarkifyError::ConversionFailed { .. }
            | MarkifyError::NotAPdf { .. }
            | MarkifyError::EmptyOutput { .. } => ErrorKind::ConversionFailed,
            MarkifyError::ModelProvisioning { .. } => ErrorKind::ModelProvisioning,
            MarkifyError::DownloadFailed { .. } | MarkifyError::DownloadTimeout { .. } => {
                ErrorKind::FetchFailed
            }
            MarkifyError::OutputWriteFailed { .. }
            | MarkifyError::InvalidConfig(_)
            | MarkifyError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Machine-readable failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidSubmission,
    UnsupportedMode,
    UnsupportedFormat,
    BackendUnavailable,
    NotImplemented,
    ConversionFailed,
    ModelProvisioning,
    FetchFailed,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidSubmission => "invalid_submission",
            ErrorKind::UnsupportedMode => "unsupported_mode",
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::NotImplemented => "not_implemented",
            ErrorKind::ConversionFailed => "conversion_failed",
            ErrorKind::ModelProvisioning => "model_provisioning",
            ErrorKind::FetchFailed => "fetch_failed",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from reading job state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// No job with this id exists.
    #[error("Job not found: {id}")]
    NotFound { id: String },

    /// The job has not reached a terminal state yet.
    #[error("Job {id} is not ready (status: {status})")]
    NotReady { id: String, status: String },

    /// The job finished in the failed state; there is no result to return.
    #[error("Job {id} has no result: {reason}")]
    NoResult { id: String, reason: String },
}
