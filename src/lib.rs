//! # markify
//!
//! Convert documents to Markdown, synchronously or as background jobs.
//!
//! ## Conversion modes
//!
//! | Mode       | What runs                                                  |
//! |------------|------------------------------------------------------------|
//! | `simple`   | raw text layer extraction with `lopdf`, no models          |
//! | `advanced` | MinerU `magic-pdf` layout/OCR backend with local models    |
//! | `cloud`    | reserved; always fails with `not_implemented`              |
//!
//! ## Architecture
//!
//! ```text
//! HTTP (server) ─┐
//!                ├─▶ JobManager ──▶ ConverterRouter ──▶ Simple | Advanced | Cloud
//! CLI ───────────┘   (JobStore)          ▲                        │
//!   └─────── convert() ──────────────────┘                        ▼
//!                                                       ModelRegistry ──▶ markify-hub
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use markify::{convert, ConversionMode, ConverterRouter, ModelConfig, ModelRegistry, ServiceConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let router = ConverterRouter::with_defaults(
//!         ModelConfig::builder().build()?,
//!         &ServiceConfig::default(),
//!         Arc::new(ModelRegistry::new()),
//!     );
//!     let result = convert("paper.pdf", ConversionMode::Simple, &router, 120).await?;
//!     println!("{}", result.text_content);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | the `markify` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `server` | on      | the [`server`] module and the `markify-server` binary (axum + tower-http) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod converter;
pub mod error;
pub mod jobs;
pub mod models;
pub mod pipeline;
#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ConversionMode, Device, ModelConfig, ModelConfigBuilder, ServiceConfig, ServiceConfigBuilder,
};
pub use convert::{convert, convert_from_bytes, convert_sync, write_output};
pub use converter::router::ConverterRouter;
pub use converter::{ConversionResult, DocumentConverter, DocumentFormat};
pub use error::{ErrorKind, JobError, MarkifyError};
pub use jobs::{InMemoryJobStore, Job, JobId, JobManager, JobState, JobStore, JobView};
pub use markify_hub::Mirror;
pub use models::{ModelBundle, ModelConfigurator, ModelRegistry, ModelType};
