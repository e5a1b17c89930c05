//! Job API route handlers.

use super::error::AppError;
use super::upload::parse_upload;
use crate::config::ConversionMode;
use crate::jobs::{JobId, JobManager, JobView};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

/// Body of `POST /api/jobs/url`.
#[derive(Debug, Deserialize)]
pub struct UrlRequest {
    pub url: String,
    #[serde(default)]
    pub pdf_mode: Option<String>,
}

/// Body of a `202 Accepted` submission response.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: String,
}

impl SubmitResponse {
    fn accepted(job_id: JobId) -> (StatusCode, Json<Self>) {
        (
            StatusCode::ACCEPTED,
            Json(Self {
                job_id,
                status: "accepted".into(),
            }),
        )
    }
}

fn parse_mode(raw: Option<&str>) -> Result<ConversionMode, AppError> {
    match raw {
        None => Ok(ConversionMode::default()),
        Some(s) => Ok(s.parse()?),
    }
}

fn parse_id(raw: &str) -> Result<JobId, AppError> {
    raw.parse().map_err(|_| AppError::job_not_found(raw))
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// POST /api/jobs
pub async fn submit_upload(
    State(manager): State<JobManager>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let form = parse_upload(multipart).await?;
    let mode = parse_mode(form.pdf_mode.as_deref())?;
    let job_id = manager.submit_bytes(&form.filename, &form.data, mode).await?;
    Ok(SubmitResponse::accepted(job_id))
}

/// POST /api/jobs/url
pub async fn submit_url(
    State(manager): State<JobManager>,
    body: Result<Json<UrlRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = body.map_err(|e| AppError::bad_request(e.body_text()))?;
    let mode = parse_mode(req.pdf_mode.as_deref())?;
    let job_id = manager.submit_url(&req.url, mode)?;
    Ok(SubmitResponse::accepted(job_id))
}

/// GET /api/jobs
pub async fn list_jobs(State(manager): State<JobManager>) -> Json<Vec<JobView>> {
    Json(manager.list_jobs().iter().map(|j| j.view()).collect())
}

/// GET /api/jobs/{id}
pub async fn get_job(
    State(manager): State<JobManager>,
    Path(id): Path<String>,
) -> Result<Json<JobView>, AppError> {
    let job = manager.get_job(parse_id(&id)?)?;
    Ok(Json(job.view()))
}

/// GET /api/jobs/{id}/result
pub async fn get_result(
    State(manager): State<JobManager>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let result = manager.get_result(parse_id(&id)?)?;
    Ok((
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        result.text_content,
    ))
}
