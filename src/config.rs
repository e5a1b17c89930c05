//! Configuration types for conversion and the job service.
//!
//! Two structs carry every knob:
//!
//! * [`ModelConfig`]: where the advanced converter's models live, which
//!   mirror they come from, which device the backend targets, and where the
//!   runtime configuration record is published. It is an explicit value: two
//!   different model configurations can coexist in one process.
//! * [`ServiceConfig`]: directories, timeouts, and concurrency limits for
//!   the job manager and HTTP surface.
//!
//! Both are built through builders whose `build()` validates the result.

use crate::error::MarkifyError;
use markify_hub::Mirror;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable naming the backend's runtime configuration file.
pub const CONFIG_PATH_ENV: &str = "MINERU_TOOLS_CONFIG_JSON";

/// File name used in the home directory when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_FILE: &str = "magic-pdf.json";

// ── Enums ────────────────────────────────────────────────────────────────

/// Conversion strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionMode {
    /// Raw text extraction, no layout awareness. (default)
    #[default]
    Simple,
    /// Layout/OCR-aware extraction through the model-backed backend.
    Advanced,
    /// Reserved for delegation to a hosted service.
    Cloud,
}

impl ConversionMode {
    pub const ALL: [ConversionMode; 3] = [
        ConversionMode::Simple,
        ConversionMode::Advanced,
        ConversionMode::Cloud,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConversionMode::Simple => "simple",
            ConversionMode::Advanced => "advanced",
            ConversionMode::Cloud => "cloud",
        }
    }
}

impl fmt::Display for ConversionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversionMode {
    type Err = MarkifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(ConversionMode::Simple),
            "advanced" => Ok(ConversionMode::Advanced),
            "cloud" => Ok(ConversionMode::Cloud),
            _ => Err(MarkifyError::UnsupportedMode {
                mode: s.to_string(),
            }),
        }
    }
}

/// Compute device the layout backend runs its models on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Device {
    #[default]
    Cpu,
    /// Apple Metal.
    Mps,
    /// Default CUDA device.
    Cuda,
    /// A specific CUDA device, rendered as `cuda:N`.
    CudaIndex(u32),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Mps => f.write_str("mps"),
            Device::Cuda => f.write_str("cuda"),
            Device::CudaIndex(n) => write!(f, "cuda:{n}"),
        }
    }
}

impl FromStr for Device {
    type Err = MarkifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "cpu" => Ok(Device::Cpu),
            "mps" => Ok(Device::Mps),
            "cuda" => Ok(Device::Cuda),
            other => other
                .strip_prefix("cuda:")
                .and_then(|n| n.parse::<u32>().ok())
                .map(Device::CudaIndex)
                .ok_or_else(|| {
                    MarkifyError::InvalidConfig(format!(
                        "unknown device '{s}' (expected cpu, mps, cuda, or cuda:N)"
                    ))
                }),
        }
    }
}

// ── Model configuration ──────────────────────────────────────────────────

/// Configuration of the advanced converter's model dependencies.
///
/// Built via [`ModelConfig::builder()`] or using [`ModelConfig::default()`].
///
/// # Example
/// ```rust
/// use markify::{Device, ModelConfig};
///
/// let config = ModelConfig::builder()
///     .device(Device::Mps)
///     .models_dir("/srv/models")
///     .use_modelscope(true)
///     .build()
///     .unwrap();
/// assert_eq!(config.device.to_string(), "mps");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelConfig {
    /// Device target written into the runtime configuration. Default: cpu.
    pub device: Device,

    /// Explicit storage root. Models go to `<root>/<model_type>`.
    /// When `None`, the mirror's conventional cache directory is used.
    pub models_dir: Option<PathBuf>,

    /// Source of the model snapshots. Default: Hugging Face.
    pub mirror: Mirror,

    /// Where the runtime configuration record is published.
    ///
    /// Defaults to `$MINERU_TOOLS_CONFIG_JSON`, read once when the config is
    /// built, else `~/magic-pdf.json`.
    pub config_path: PathBuf,

    /// Per-request timeout for model downloads in seconds. Default: 600.
    ///
    /// Applies to each listing call and each file; the largest weights are
    /// a few hundred megabytes.
    pub download_timeout_secs: u64,

    /// Alternative mirror endpoint (proxy or private mirror).
    /// When `None`, `HF_ENDPOINT` / `MODELSCOPE_ENDPOINT` or the public hub is used.
    pub hub_endpoint: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            device: Device::default(),
            models_dir: None,
            mirror: Mirror::HuggingFace,
            config_path: default_config_path(),
            download_timeout_secs: 600,
            hub_endpoint: None,
        }
    }
}

impl ModelConfig {
    /// Create a new builder for `ModelConfig`.
    pub fn builder() -> ModelConfigBuilder {
        ModelConfigBuilder {
            config: Self {
                config_path: PathBuf::new(),
                ..Self::default()
            },
            config_path_set: false,
        }
    }

    /// `true` when the ModelScope mirror is selected.
    pub fn use_modelscope(&self) -> bool {
        self.mirror == Mirror::ModelScope
    }
}

/// Builder for [`ModelConfig`].
#[derive(Debug)]
pub struct ModelConfigBuilder {
    config: ModelConfig,
    config_path_set: bool,
}

impl ModelConfigBuilder {
    pub fn device(mut self, device: Device) -> Self {
        self.config.device = device;
        self
    }

    pub fn models_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.models_dir = Some(dir.into());
        self
    }

    pub fn use_modelscope(mut self, yes: bool) -> Self {
        self.config.mirror = if yes {
            Mirror::ModelScope
        } else {
            Mirror::HuggingFace
        };
        self
    }

    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.config_path = path.into();
        self.config_path_set = true;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn hub_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.hub_endpoint = Some(endpoint.into());
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// `~` in `models_dir` and `config_path` is expanded and relative storage
    /// roots are made absolute, so the resolved model paths written into the
    /// runtime configuration are always absolute.
    pub fn build(mut self) -> Result<ModelConfig, MarkifyError> {
        if !self.config_path_set {
            self.config.config_path = default_config_path();
        }
        if self.config.config_path.as_os_str().is_empty() {
            return Err(MarkifyError::InvalidConfig(
                "model config path must not be empty".into(),
            ));
        }
        self.config.config_path = expand_tilde(&self.config.config_path);

        if let Some(dir) = self.config.models_dir.take() {
            if dir.as_os_str().is_empty() {
                return Err(MarkifyError::InvalidConfig(
                    "models directory must not be empty".into(),
                ));
            }
            self.config.models_dir = Some(absolutize(&expand_tilde(&dir))?);
        }

        if self.config.download_timeout_secs == 0 {
            return Err(MarkifyError::InvalidConfig(
                "download timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

fn default_config_path() -> PathBuf {
    match std::env::var_os(CONFIG_PATH_ENV) {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_CONFIG_FILE),
    }
}

/// Expand a leading `~` to the user's home directory.
pub(crate) fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

fn absolutize(path: &Path) -> Result<PathBuf, MarkifyError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|e| MarkifyError::InvalidConfig(format!("cannot resolve '{}': {e}", path.display())))
}

// ── Service configuration ────────────────────────────────────────────────

/// Configuration for the job manager and its converters.
///
/// # Example
/// ```rust
/// use markify::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .staging_dir("/tmp/markify/staging")
///     .max_concurrent_jobs(2)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_concurrent_jobs, 2);
/// ```
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Uploaded and fetched inputs are staged under `<staging_dir>/<job_id>/`.
    pub staging_dir: PathBuf,

    /// Advanced-mode Markdown and image assets go under
    /// `<output_dir>/<run_id>/`. Default: `output`.
    pub output_dir: PathBuf,

    /// Timeout for fetching URL-sourced inputs in seconds. Default: 120.
    pub fetch_timeout_secs: u64,

    /// Timeout for one run of the layout backend in seconds. Default: 1800.
    pub backend_timeout_secs: u64,

    /// Explicit path to the `magic-pdf` executable. Default: look up on `PATH`.
    pub backend_program: Option<PathBuf>,

    /// Maximum number of jobs converting at the same time. Default: 4.
    ///
    /// Further jobs stay `queued` until a slot frees up.
    pub max_concurrent_jobs: usize,

    /// Largest accepted upload in bytes. Default: 200 MiB.
    pub max_upload_bytes: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            staging_dir: std::env::temp_dir().join("markify").join("staging"),
            output_dir: PathBuf::from("output"),
            fetch_timeout_secs: 120,
            backend_timeout_secs: 1800,
            backend_program: None,
            max_concurrent_jobs: 4,
            max_upload_bytes: 200 * 1024 * 1024,
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.staging_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs;
        self
    }

    pub fn backend_timeout_secs(mut self, secs: u64) -> Self {
        self.config.backend_timeout_secs = secs;
        self
    }

    pub fn backend_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.config.backend_program = Some(program.into());
        self
    }

    pub fn max_concurrent_jobs(mut self, n: usize) -> Self {
        self.config.max_concurrent_jobs = n;
        self
    }

    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, MarkifyError> {
        let c = &self.config;
        if c.max_concurrent_jobs == 0 {
            return Err(MarkifyError::InvalidConfig(
                "max concurrent jobs must be ≥ 1".into(),
            ));
        }
        if c.fetch_timeout_secs == 0 || c.backend_timeout_secs == 0 {
            return Err(MarkifyError::InvalidConfig(
                "timeouts must be ≥ 1 second".into(),
            ));
        }
        if c.max_upload_bytes == 0 {
            return Err(MarkifyError::InvalidConfig(
                "max upload size must be ≥ 1 byte".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("Simple".parse::<ConversionMode>().unwrap(), ConversionMode::Simple);
        assert_eq!(" advanced ".parse::<ConversionMode>().unwrap(), ConversionMode::Advanced);
        assert_eq!("cloud".parse::<ConversionMode>().unwrap(), ConversionMode::Cloud);
    }

    #[test]
    fn unknown_mode_is_unsupported_mode() {
        let err = "turbo".parse::<ConversionMode>().unwrap_err();
        assert!(matches!(err, MarkifyError::UnsupportedMode { ref mode } if mode == "turbo"));
    }

    #[test]
    fn device_round_trips_through_display() {
        for s in ["cpu", "mps", "cuda", "cuda:0", "cuda:1"] {
            let d: Device = s.parse().unwrap();
            assert_eq!(d.to_string(), s);
        }
        assert!("tpu".parse::<Device>().is_err());
        assert!("cuda:x".parse::<Device>().is_err());
    }

    #[test]
    fn explicit_config_path_wins() {
        let c = ModelConfig::builder()
            .config_path("/tmp/custom-magic.json")
            .build()
            .unwrap();
        assert_eq!(c.config_path, PathBuf::from("/tmp/custom-magic.json"));
    }

    #[test]
    fn relative_models_dir_becomes_absolute() {
        let c = ModelConfig::builder()
            .models_dir("models")
            .config_path("/tmp/x.json")
            .build()
            .unwrap();
        assert!(c.models_dir.unwrap().is_absolute());
    }

    #[test]
    fn modelscope_toggle_selects_mirror() {
        let c = ModelConfig::builder()
            .use_modelscope(true)
            .config_path("/tmp/x.json")
            .build()
            .unwrap();
        assert_eq!(c.mirror, Mirror::ModelScope);
        assert!(c.use_modelscope());
    }

    #[test]
    fn zero_jobs_rejected() {
        let err = ServiceConfig::builder()
            .max_concurrent_jobs(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("max concurrent jobs"));
    }

    #[test]
    fn service_defaults() {
        let c = ServiceConfig::default();
        assert_eq!(c.max_concurrent_jobs, 4);
        assert_eq!(c.fetch_timeout_secs, 120);
        assert_eq!(c.output_dir, PathBuf::from("output"));
    }
}
