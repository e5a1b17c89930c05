//! Layout-aware PDF conversion backed by local models.
//!
//! ## Data Flow
//!
//! ```text
//! pdf ──▶ backend check ──▶ model bundle ──▶ backend run ──▶ cleanup ──▶ title levels
//!         (fail fast if      (ModelRegistry,   (own output    (postprocess)  (titles)
//!          not installed)     once per config)  dir per run)
//! ```
//!
//! Each run writes into `<output_root>/<run-id>/`, so two jobs converting
//! files with the same name never share a directory. The corrected Markdown
//! is written back next to the images it references.

use super::backend::{LayoutBackend, MineruCliBackend};
use super::{ConversionResult, DocumentConverter, DocumentFormat};
use crate::config::{ModelConfig, ServiceConfig};
use crate::error::MarkifyError;
use crate::models::ModelRegistry;
use crate::pipeline::{postprocess, titles};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Model-backed layout/OCR converter.
#[derive(Clone)]
pub struct AdvancedConverter {
    models: ModelConfig,
    registry: Arc<ModelRegistry>,
    backend: Arc<dyn LayoutBackend>,
    output_root: PathBuf,
}

impl std::fmt::Debug for AdvancedConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdvancedConverter")
            .field("models", &self.models)
            .field("backend", &self.backend.name())
            .field("output_root", &self.output_root)
            .finish()
    }
}

impl AdvancedConverter {
    pub fn new(
        models: ModelConfig,
        registry: Arc<ModelRegistry>,
        backend: Arc<dyn LayoutBackend>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            models,
            registry,
            backend,
            output_root: output_root.into(),
        }
    }

    /// Converter using the `magic-pdf` backend as configured in `service`.
    pub fn with_mineru(
        models: ModelConfig,
        registry: Arc<ModelRegistry>,
        service: &ServiceConfig,
    ) -> Self {
        let backend = MineruCliBackend::new(
            service.backend_program.clone(),
            Duration::from_secs(service.backend_timeout_secs),
        );
        Self::new(models, registry, Arc::new(backend), service.output_dir.clone())
    }

    pub fn model_config(&self) -> &ModelConfig {
        &self.models
    }
}

#[async_trait]
impl DocumentConverter for AdvancedConverter {
    fn name(&self) -> &'static str {
        "Advanced PDF"
    }

    fn formats(&self) -> &'static [DocumentFormat] {
        &[DocumentFormat::Pdf]
    }

    async fn convert(
        &self,
        path: &Path,
        _format: DocumentFormat,
    ) -> Result<ConversionResult, MarkifyError> {
        self.backend.check_available().await?;
        let bundle = self.registry.bundle(&self.models).await?;

        let out_dir = self.output_root.join(Uuid::new_v4().simple().to_string());
        tokio::fs::create_dir_all(&out_dir)
            .await
            .map_err(|e| MarkifyError::OutputWriteFailed {
                path: out_dir.clone(),
                source: e,
            })?;

        let output = self.backend.process(path, &bundle, &out_dir).await?;

        let raw = tokio::fs::read_to_string(&output.markdown_path)
            .await
            .map_err(|e| MarkifyError::BackendFailed {
                detail: format!("cannot read '{}': {e}", output.markdown_path.display()),
            })?;
        let markdown = titles::correct_title_levels(&postprocess::clean_markdown(&raw));

        tokio::fs::write(&output.markdown_path, &markdown)
            .await
            .map_err(|e| MarkifyError::OutputWriteFailed {
                path: output.markdown_path.clone(),
                source: e,
            })?;

        info!(
            markdown = %output.markdown_path.display(),
            chars = markdown.len(),
            "Advanced conversion complete"
        );

        Ok(ConversionResult {
            title: path.file_stem().map(|s| s.to_string_lossy().into_owned()),
            text_content: markdown,
            assets_dir: output.images_dir,
        })
    }
}
