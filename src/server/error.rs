//! Error-to-HTTP response conversion.
//!
//! Handlers return `Result<T, AppError>`; every error body has the shape
//! `{"error": <message>, "code": <kind>}`.

use crate::error::{ErrorKind, JobError, MarkifyError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// An HTTP-ready error.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            ErrorKind::InvalidSubmission.as_str(),
            message,
        )
    }

    /// Unknown or malformed job id.
    pub fn job_not_found(id: &str) -> Self {
        JobError::NotFound { id: id.to_string() }.into()
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<MarkifyError> for AppError {
    fn from(e: MarkifyError) -> Self {
        let kind = e.kind();
        let status = match kind {
            ErrorKind::InvalidSubmission | ErrorKind::UnsupportedMode => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, kind.as_str(), e.to_string())
    }
}

impl From<JobError> for AppError {
    fn from(e: JobError) -> Self {
        let (status, code) = match &e {
            JobError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            JobError::NotReady { .. } => (StatusCode::CONFLICT, "not_ready"),
            JobError::NoResult { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "no_result"),
        };
        Self::new(status, code, e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "Server error in API handler");
        }
        let body = json!({
            "error": self.message,
            "code": self.code,
        });
        (self.status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_errors_map_to_statuses() {
        let nf: AppError = JobError::NotFound { id: "x".into() }.into();
        assert_eq!(nf.status(), StatusCode::NOT_FOUND);

        let nr: AppError = JobError::NotReady {
            id: "x".into(),
            status: "processing".into(),
        }
        .into();
        assert_eq!(nr.status(), StatusCode::CONFLICT);

        let no: AppError = JobError::NoResult {
            id: "x".into(),
            reason: "boom".into(),
        }
        .into();
        assert_eq!(no.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(no.code(), "no_result");
    }

    #[test]
    fn unsupported_mode_is_bad_request() {
        let e: AppError = MarkifyError::UnsupportedMode {
            mode: "turbo".into(),
        }
        .into();
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);
        assert_eq!(e.code(), "unsupported_mode");
    }

    #[test]
    fn empty_upload_is_bad_request() {
        let e: AppError = MarkifyError::EmptyPayload {
            filename: "a.pdf".into(),
        }
        .into();
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);
        assert_eq!(e.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
