//! HTTP job server for markify.
//!
//! Maps flags (or `MARKIFY_*` environment variables) onto [`ServiceConfig`]
//! and [`ModelConfig`], builds the job manager, and serves the API until
//! Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use markify::server::{app, DEFAULT_BIND};
use markify::{ConverterRouter, Device, JobManager, ModelConfig, ModelRegistry, ServiceConfig};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Serve document-to-Markdown conversion jobs over HTTP.
#[derive(Parser, Debug)]
#[command(name = "markify-server", version, about = "Markdown conversion job server")]
struct Cli {
    /// Listen address.
    #[arg(long, env = "MARKIFY_BIND", default_value = DEFAULT_BIND)]
    bind: SocketAddr,

    /// Directory for uploaded and fetched inputs.
    #[arg(long, env = "MARKIFY_STAGING_DIR")]
    staging_dir: Option<PathBuf>,

    /// Root for advanced-mode output (Markdown and images).
    #[arg(long, env = "MARKIFY_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Maximum number of jobs converting at the same time.
    #[arg(long, env = "MARKIFY_MAX_JOBS", default_value_t = 4)]
    max_jobs: usize,

    /// Upload size limit in MiB.
    #[arg(long, env = "MARKIFY_MAX_UPLOAD_MB", default_value_t = 200)]
    max_upload_mb: usize,

    /// URL fetch timeout in seconds.
    #[arg(long, env = "MARKIFY_FETCH_TIMEOUT", default_value_t = 120)]
    fetch_timeout: u64,

    /// Advanced backend timeout in seconds.
    #[arg(long, env = "MARKIFY_BACKEND_TIMEOUT", default_value_t = 1800)]
    backend_timeout: u64,

    /// Path to the magic-pdf executable (default: looked up on PATH).
    #[arg(long, env = "MARKIFY_MAGIC_PDF")]
    magic_pdf: Option<PathBuf>,

    /// Inference device for advanced mode: cpu, mps, cuda, cuda:N.
    #[arg(long, env = "MARKIFY_DEVICE", default_value = "cpu")]
    device: Device,

    /// Root directory for downloaded models (default: the mirror's cache).
    #[arg(long, env = "MARKIFY_MODELS_DIR")]
    models_dir: Option<PathBuf>,

    /// Download models from ModelScope instead of Hugging Face.
    #[arg(long, env = "MARKIFY_USE_MODELSCOPE")]
    use_modelscope: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MARKIFY_VERBOSE")]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long, env = "MARKIFY_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Config ───────────────────────────────────────────────────────────
    let mut models = ModelConfig::builder()
        .device(cli.device)
        .use_modelscope(cli.use_modelscope);
    if let Some(ref dir) = cli.models_dir {
        models = models.models_dir(dir);
    }
    let models = models.build().context("Invalid model configuration")?;

    let mut service = ServiceConfig::builder()
        .output_dir(&cli.output_dir)
        .max_concurrent_jobs(cli.max_jobs)
        .max_upload_bytes(cli.max_upload_mb.saturating_mul(1024 * 1024))
        .fetch_timeout_secs(cli.fetch_timeout)
        .backend_timeout_secs(cli.backend_timeout);
    if let Some(ref dir) = cli.staging_dir {
        service = service.staging_dir(dir);
    }
    if let Some(ref program) = cli.magic_pdf {
        service = service.backend_program(program);
    }
    let service = service.build().context("Invalid configuration")?;

    tokio::fs::create_dir_all(&service.staging_dir)
        .await
        .with_context(|| format!("Failed to create {}", service.staging_dir.display()))?;

    // ── Serve ────────────────────────────────────────────────────────────
    let router = ConverterRouter::with_defaults(models, &service, Arc::new(ModelRegistry::new()));
    let manager = JobManager::in_memory(router, service);

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    info!(addr = %cli.bind, "markify-server listening");

    axum::serve(listener, app(manager))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("markify-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Could not install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
