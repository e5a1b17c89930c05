//! CLI binary for markify.
//!
//! A thin shim over the library crate: flags become a [`ModelConfig`] and a
//! [`ServiceConfig`], the input goes through the same [`ConverterRouter`]
//! the server uses, and the Markdown goes to stdout or a file.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use markify::converter::backend::{LayoutBackend, MineruCliBackend};
use markify::models::SharedModelProgress;
use markify::{
    convert, convert_from_bytes, write_output, ConversionMode, ConverterRouter, Device,
    ModelConfig, ModelRegistry, ModelType, ServiceConfig,
};
use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Text-layer extraction (stdout)
  markify paper.pdf

  # Convert to file
  markify paper.pdf -o paper.md

  # Read from stdin
  cat paper.pdf | markify > paper.md

  # Layout-aware conversion with local models on the GPU
  markify --pdf-mode advanced --device cuda paper.pdf -o paper.md

  # Download models from ModelScope into a fixed directory
  markify --pdf-mode advanced --use-modelscope --models-dir ~/models scan.pdf

  # Convert from URL
  markify https://arxiv.org/pdf/1706.03762 -o attention.md

MODES:
  simple     text layer only, fast, no models
  advanced   MinerU magic-pdf with layout/OCR models (pip install -U "magic-pdf[full]")
  cloud      not implemented yet

ENVIRONMENT VARIABLES:
  MINERU_TOOLS_CONFIG_JSON  Where the model configuration is written (default ~/magic-pdf.json)
  HF_ENDPOINT               Hugging Face mirror endpoint
  MODELSCOPE_ENDPOINT       ModelScope mirror endpoint
  RUST_LOG                  Log filter, overrides -v / -q
"#;

/// Convert documents to Markdown.
#[derive(Parser, Debug)]
#[command(
    name = "markify",
    version,
    about = "Convert documents to Markdown",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file path or HTTP/HTTPS URL. Reads stdin when omitted.
    input: Option<String>,

    /// Write Markdown to this file instead of stdout.
    #[arg(short, long, env = "MARKIFY_OUTPUT")]
    output: Option<PathBuf>,

    /// Conversion mode.
    #[arg(long, env = "MARKIFY_PDF_MODE", value_enum, default_value = "simple")]
    pdf_mode: ModeArg,

    /// Inference device for advanced mode: cpu, mps, cuda, cuda:N.
    #[arg(long, env = "MARKIFY_DEVICE", default_value = "cpu")]
    device: Device,

    /// Root directory for downloaded models (default: the mirror's cache).
    #[arg(long, env = "MARKIFY_MODELS_DIR")]
    models_dir: Option<PathBuf>,

    /// Download models from ModelScope instead of Hugging Face.
    #[arg(long, env = "MARKIFY_USE_MODELSCOPE")]
    use_modelscope: bool,

    /// Where advanced mode writes Markdown and extracted images.
    #[arg(long, env = "MARKIFY_ASSETS_DIR", default_value = "output")]
    assets_dir: PathBuf,

    /// Path to the magic-pdf executable (default: looked up on PATH).
    #[arg(long, env = "MARKIFY_MAGIC_PDF")]
    magic_pdf: Option<PathBuf>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "MARKIFY_FETCH_TIMEOUT", default_value_t = 120)]
    fetch_timeout: u64,

    /// Advanced backend timeout in seconds.
    #[arg(long, env = "MARKIFY_BACKEND_TIMEOUT", default_value_t = 1800)]
    backend_timeout: u64,

    /// Print the result as JSON (title, text_content, assets_dir).
    #[arg(long, env = "MARKIFY_JSON")]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MARKIFY_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MARKIFY_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Simple,
    Advanced,
    Cloud,
}

impl From<ModeArg> for ConversionMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Simple => ConversionMode::Simple,
            ModeArg::Advanced => ConversionMode::Advanced,
            ModeArg::Cloud => ConversionMode::Cloud,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
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

    // ── Build config ─────────────────────────────────────────────────────
    let models = ModelConfig::builder()
        .device(cli.device)
        .use_modelscope(cli.use_modelscope);
    let models = match &cli.models_dir {
        Some(dir) => models.models_dir(dir),
        None => models,
    };
    let models = models.build().context("Invalid model configuration")?;

    let mut service = ServiceConfig::builder()
        .output_dir(&cli.assets_dir)
        .fetch_timeout_secs(cli.fetch_timeout)
        .backend_timeout_secs(cli.backend_timeout);
    if let Some(ref program) = cli.magic_pdf {
        service = service.backend_program(program);
    }
    let service = service.build().context("Invalid configuration")?;

    let registry = Arc::new(ModelRegistry::new());
    let mode = ConversionMode::from(cli.pdf_mode);

    // ── Provision models up front ────────────────────────────────────────
    if mode == ConversionMode::Advanced {
        MineruCliBackend::new(
            service.backend_program.clone(),
            Duration::from_secs(service.backend_timeout_secs),
        )
        .check_available()
        .await?;
        provision_models(&registry, &models, cli.quiet)
            .await
            .context("Failed to prepare models")?;
    }

    let router = ConverterRouter::with_defaults(models, &service, registry);

    // ── Run conversion ───────────────────────────────────────────────────
    let result = match cli.input.as_deref() {
        Some(input) => convert(input, mode, &router, service.fetch_timeout_secs)
            .await
            .context("Conversion failed")?,
        None => {
            if io::stdin().is_terminal() {
                anyhow::bail!("No input given. Pass a file path or URL, or pipe a document on stdin.");
            }
            let mut bytes = Vec::new();
            tokio::task::block_in_place(|| io::stdin().lock().read_to_end(&mut bytes))
                .context("Failed to read stdin")?;
            convert_from_bytes(&bytes, mode, &router)
                .await
                .context("Conversion failed")?
        }
    };

    let rendered = if cli.json {
        serde_json::to_string_pretty(&result).context("Failed to serialise result")? + "\n"
    } else {
        result.text_content.clone()
    };

    match cli.output {
        Some(ref path) => {
            write_output(path, &rendered)
                .await
                .context("Failed to write output")?;
            if !cli.quiet {
                eprintln!("✔ {}", path.display());
            }
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(rendered.as_bytes())
                .context("Failed to write to stdout")?;
            if !rendered.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
        }
    }

    if !cli.quiet {
        if let Some(ref assets) = result.assets_dir {
            eprintln!("  images: {}", assets.display());
        }
    }
    Ok(())
}

/// Download missing models with a progress bar, then publish the config.
async fn provision_models(
    registry: &ModelRegistry,
    models: &ModelConfig,
    quiet: bool,
) -> Result<()> {
    if quiet {
        registry.bundle(models).await?;
        return Ok(());
    }

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
    );
    bar.set_prefix(model_label(ModelType::Main));
    bar.enable_steady_tick(Duration::from_millis(80));

    let cb_bar = bar.clone();
    let on_progress: SharedModelProgress = Arc::new(move |model: ModelType, downloaded: u64, total: Option<u64>| {
        let label = model_label(model);
        if cb_bar.prefix() != label {
            cb_bar.set_prefix(label);
            cb_bar.reset();
        }
        if let Some(t) = total {
            if cb_bar.length() != Some(t) {
                cb_bar.set_length(t);
            }
        }
        cb_bar.set_position(downloaded);
    });

    let bundle = registry.bundle_with_progress(models, Some(on_progress)).await;
    bar.finish_and_clear();
    let bundle = bundle?;

    for model in ModelType::ALL {
        eprintln!("✔ {:<8} {}", model.key(), bundle.path(model).display());
    }
    eprintln!("  config   {}", bundle.config_path.display());
    Ok(())
}

fn model_label(model: ModelType) -> String {
    format!("{} model", model.key())
}
