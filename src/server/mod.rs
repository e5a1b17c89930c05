//! HTTP job API.
//!
//! | Method & path               | Handler                     |
//! |-----------------------------|-----------------------------|
//! | `GET /health`               | [`routes::health`]          |
//! | `POST /api/jobs`            | [`routes::submit_upload`]   |
//! | `GET /api/jobs`             | [`routes::list_jobs`]       |
//! | `POST /api/jobs/url`        | [`routes::submit_url`]      |
//! | `GET /api/jobs/{id}`        | [`routes::get_job`]         |
//! | `GET /api/jobs/{id}/result` | [`routes::get_result`]      |
//!
//! Handlers only translate between HTTP and [`JobManager`]; conversions run
//! in the manager's background tasks.

pub mod error;
pub mod routes;
pub mod upload;

pub use error::AppError;

use crate::jobs::JobManager;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Default listen address of `markify-server`.
pub const DEFAULT_BIND: &str = "0.0.0.0:20926";

/// Build the application router around `manager`.
pub fn app(manager: JobManager) -> Router {
    let body_limit = DefaultBodyLimit::max(manager.config().max_upload_bytes);

    Router::new()
        .route("/health", get(routes::health))
        .route(
            "/api/jobs",
            post(routes::submit_upload).get(routes::list_jobs),
        )
        .route("/api/jobs/url", post(routes::submit_url))
        .route("/api/jobs/{id}", get(routes::get_job))
        .route("/api/jobs/{id}/result", get(routes::get_result))
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(manager)
}
