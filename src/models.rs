//! Model provisioning for the advanced converter.
//!
//! The layout backend needs two model repositories on local disk and a small
//! JSON record telling it where they are:
//!
//! ```text
//! ModelConfig ──▶ resolve_cache_dir ──▶ ensure_models ──▶ publish_config ──▶ ModelBundle
//!                 (root/<type> or        (snapshot via     (merge-write
//!                  mirror cache)          markify-hub)      magic-pdf.json)
//! ```
//!
//! [`ModelConfigurator`] does the work for one configuration and is fully
//! synchronous. [`ModelRegistry`] is the process-wide cache in front of it:
//! one [`ModelBundle`] per distinct [`ModelConfig`], provisioned at most once
//! even when many jobs ask for it at the same moment.
//!
//! Nothing here touches the process environment. The published config path
//! travels inside the bundle and is handed to the backend process only.

use crate::config::{Device, ModelConfig};
use crate::error::MarkifyError;
use markify_hub::{HubClient, Mirror};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Schema version written into the runtime configuration record.
pub const CONFIG_VERSION: &str = "1.1.0";

/// Serialises read-merge-write cycles on configuration files in this process.
static CONFIG_WRITE_LOCK: Mutex<()> = parking_lot::const_mutex(());

// ── Model types ──────────────────────────────────────────────────────────

/// The two model repositories the layout backend depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelType {
    /// Layout detection, formula and OCR weights.
    Main,
    /// Reading-order model.
    Layout,
}

impl ModelType {
    pub const ALL: [ModelType; 2] = [ModelType::Main, ModelType::Layout];

    /// Key used for `<models_dir>/<key>` and in log output.
    pub fn key(self) -> &'static str {
        match self {
            ModelType::Main => "main",
            ModelType::Layout => "layout",
        }
    }

    /// Repository identifier on both mirrors.
    pub fn repo(self) -> &'static str {
        match self {
            ModelType::Main => "opendatalab/PDF-Extract-Kit-1.0",
            ModelType::Layout => "hantian/layoutreader",
        }
    }

    /// Directory the backend should be pointed at, given the snapshot root.
    ///
    /// The main repository keeps its weights under `models/`; the layout
    /// repository is used as-is.
    pub fn usable_root(self, snapshot: &Path) -> PathBuf {
        match self {
            ModelType::Main => snapshot.join("models"),
            ModelType::Layout => snapshot.to_path_buf(),
        }
    }
}

/// Usable model roots after [`ModelConfigurator::ensure_models`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub main: PathBuf,
    pub layout: PathBuf,
}

/// Fully provisioned model state for one configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelBundle {
    pub main: PathBuf,
    pub layout: PathBuf,
    pub mirror: Mirror,
    pub device: Device,
    /// Runtime configuration record referencing `main` and `layout`.
    pub config_path: PathBuf,
}

impl ModelBundle {
    pub fn path(&self, model: ModelType) -> &Path {
        match model {
            ModelType::Main => &self.main,
            ModelType::Layout => &self.layout,
        }
    }
}

/// Progress callback: `(model, bytes_downloaded, total_bytes_option)`.
pub type ModelProgress<'a> = &'a dyn Fn(ModelType, u64, Option<u64>);

/// Owned, thread-safe form of [`ModelProgress`] for [`ModelRegistry`].
pub type SharedModelProgress = Arc<dyn Fn(ModelType, u64, Option<u64>) + Send + Sync>;

// ── Configurator ─────────────────────────────────────────────────────────

/// Provisions models and publishes the runtime configuration for one
/// [`ModelConfig`].
#[derive(Debug, Clone)]
pub struct ModelConfigurator {
    config: ModelConfig,
    hub: HubClient,
}

impl ModelConfigurator {
    /// Create a configurator talking to the configured mirror.
    pub fn new(config: ModelConfig) -> Result<Self, MarkifyError> {
        let timeout = Duration::from_secs(config.download_timeout_secs);
        let hub = match config.hub_endpoint.as_deref() {
            Some(endpoint) => HubClient::with_endpoint(config.mirror, endpoint, timeout),
            None => HubClient::new(config.mirror, timeout),
        }
        .map_err(|e| MarkifyError::ModelProvisioning {
            model: "all".into(),
            detail: e.to_string(),
        })?;
        Ok(Self { config, hub })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Directory the snapshot of `model` is materialised into.
    ///
    /// `<models_dir>/<key>` when a storage root is configured, otherwise the
    /// mirror's conventional cache location for the repository.
    pub fn resolve_cache_dir(&self, model: ModelType) -> Result<PathBuf, MarkifyError> {
        if let Some(root) = &self.config.models_dir {
            return Ok(root.join(model.key()));
        }
        self.config
            .mirror
            .default_cache_dir(model.repo())
            .ok_or_else(|| MarkifyError::ModelProvisioning {
                model: model.key().into(),
                detail: "cannot determine the home directory; pass --models-dir".into(),
            })
    }

    /// Make both model snapshots available locally.
    ///
    /// Already-complete snapshots are reused without network access. Any
    /// failure fails the whole call.
    pub fn ensure_models(
        &self,
        on_progress: Option<ModelProgress<'_>>,
    ) -> Result<ModelPaths, MarkifyError> {
        let main = self.ensure_model(ModelType::Main, on_progress)?;
        let layout = self.ensure_model(ModelType::Layout, on_progress)?;
        Ok(ModelPaths { main, layout })
    }

    fn ensure_model(
        &self,
        model: ModelType,
        on_progress: Option<ModelProgress<'_>>,
    ) -> Result<PathBuf, MarkifyError> {
        let dir = self.resolve_cache_dir(model)?;
        info!(
            model = model.key(),
            dir = %dir.display(),
            mirror = %self.config.mirror,
            "Ensuring model"
        );

        let forward =
            on_progress.map(|cb| move |done: u64, total: Option<u64>| cb(model, done, total));
        let snapshot = self
            .hub
            .snapshot_download(
                model.repo(),
                &dir,
                forward.as_ref().map(|f| f as &dyn Fn(u64, Option<u64>)),
            )
            .map_err(|e| MarkifyError::ModelProvisioning {
                model: model.key().into(),
                detail: e.to_string(),
            })?;
        Ok(model.usable_root(&snapshot))
    }

    /// Merge-write the runtime configuration record.
    ///
    /// Keys this configurator manages are overwritten; every other key in an
    /// existing file is kept verbatim. The file is replaced atomically.
    pub fn publish_config(&self, paths: &ModelPaths) -> Result<PathBuf, MarkifyError> {
        let path = &self.config.config_path;
        let provisioning = |detail: String| MarkifyError::ModelProvisioning {
            model: "config".into(),
            detail,
        };

        let _guard = CONFIG_WRITE_LOCK.lock();

        let mut record = match std::fs::read_to_string(path) {
            Ok(text) if text.trim().is_empty() => Map::new(),
            Ok(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    return Err(provisioning(format!(
                        "'{}' does not contain a JSON object",
                        path.display()
                    )))
                }
                Err(e) => {
                    return Err(provisioning(format!(
                        "'{}' is not valid JSON: {e}",
                        path.display()
                    )))
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(provisioning(format!("cannot read '{}': {e}", path.display()))),
        };

        record.insert("device-mode".into(), Value::String(self.config.device.to_string()));
        record.insert("models-dir".into(), Value::String(paths.main.display().to_string()));
        record.insert(
            "layoutreader-model-dir".into(),
            Value::String(paths.layout.display().to_string()),
        );
        record.insert("config_version".into(), Value::String(CONFIG_VERSION.into()));

        let json = serde_json::to_string_pretty(&Value::Object(record))
            .map_err(|e| provisioning(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| provisioning(format!("cannot create '{}': {e}", parent.display())))?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, format!("{json}\n"))
            .map_err(|e| provisioning(format!("cannot write '{}': {e}", tmp.display())))?;
        std::fs::rename(&tmp, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            provisioning(format!("cannot replace '{}': {e}", path.display()))
        })?;

        debug!(path = %path.display(), "Published model configuration");
        Ok(path.clone())
    }

    /// Ensure models, then publish the configuration that references them.
    pub fn setup(&self, on_progress: Option<ModelProgress<'_>>) -> Result<ModelBundle, MarkifyError> {
        let paths = self.ensure_models(on_progress)?;
        let config_path = self.publish_config(&paths)?;
        Ok(ModelBundle {
            main: paths.main,
            layout: paths.layout,
            mirror: self.config.mirror,
            device: self.config.device,
            config_path,
        })
    }
}

// ── Registry ─────────────────────────────────────────────────────────────

/// Process-wide cache of provisioned bundles, keyed by configuration.
///
/// Concurrent callers with the same configuration share one provisioning
/// run. A failed run is not cached; the next caller tries again.
///
/// Each configuration file belongs to the first configuration that uses it.
/// A later configuration that would publish different contents to the same
/// file (another device, storage root, or mirror) is rejected, since the
/// backend of a cached bundle would otherwise read the other record.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    cells: Mutex<HashMap<ModelConfig, Arc<OnceCell<ModelBundle>>>>,
    owners: Mutex<HashMap<PathBuf, ModelConfig>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the bundle for `config`, provisioning it on first use.
    pub async fn bundle(&self, config: &ModelConfig) -> Result<ModelBundle, MarkifyError> {
        self.bundle_with_progress(config, None).await
    }

    /// Like [`bundle`](Self::bundle), reporting download progress if this
    /// call ends up doing the provisioning.
    pub async fn bundle_with_progress(
        &self,
        config: &ModelConfig,
        on_progress: Option<SharedModelProgress>,
    ) -> Result<ModelBundle, MarkifyError> {
        self.claim_config_path(config)?;
        let cell = self.cells.lock().entry(config.clone()).or_default().clone();

        let bundle = cell
            .get_or_try_init(|| async move {
                let config = config.clone();
                tokio::task::spawn_blocking(move || {
                    let progress = on_progress.as_deref().map(|f| f as ModelProgress<'_>);
                    ModelConfigurator::new(config)?.setup(progress)
                })
                .await
                .map_err(|e| MarkifyError::Internal(format!("model provisioning task: {e}")))?
            })
            .await?;
        Ok(bundle.clone())
    }

    fn claim_config_path(&self, config: &ModelConfig) -> Result<(), MarkifyError> {
        let mut owners = self.owners.lock();
        let owner = owners
            .entry(config.config_path.clone())
            .or_insert_with(|| config.clone());
        let same_record = owner.device == config.device
            && owner.models_dir == config.models_dir
            && owner.mirror == config.mirror;
        if same_record {
            return Ok(());
        }
        Err(MarkifyError::InvalidConfig(format!(
            "'{}' already holds the model configuration for device {} ({}); \
             use a separate config path for device {} ({})",
            config.config_path.display(),
            owner.device,
            owner.mirror,
            config.device,
            config.mirror,
        )))
    }

    /// The bundle for `config` if it has already been provisioned.
    pub fn cached(&self, config: &ModelConfig) -> Option<ModelBundle> {
        self.cells
            .lock()
            .get(config)
            .and_then(|cell| cell.get().cloned())
    }
}
