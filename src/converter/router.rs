//! Mode → converter selection.
//!
//! The router holds exactly one converter per [`ConversionMode`] and does no
//! conversion work of its own. Both the CLI and the job manager go through
//! [`ConverterRouter::convert`], so a new mode or format only means
//! registering another converter.

use super::advanced::AdvancedConverter;
use super::cloud::CloudConverter;
use super::simple::SimpleConverter;
use super::{ConversionResult, DocumentConverter, DocumentFormat};
use crate::config::{ConversionMode, ModelConfig, ServiceConfig};
use crate::error::MarkifyError;
use crate::models::ModelRegistry;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Registry of converters keyed by mode.
#[derive(Clone, Default)]
pub struct ConverterRouter {
    converters: HashMap<ConversionMode, Arc<dyn DocumentConverter>>,
}

impl std::fmt::Debug for ConverterRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<(ConversionMode, &str)> =
            self.converters.iter().map(|(m, c)| (*m, c.name())).collect();
        names.sort_by_key(|(m, _)| m.as_str());
        f.debug_struct("ConverterRouter")
            .field("converters", &names)
            .finish()
    }
}

impl ConverterRouter {
    /// An empty router. Every mode is unsupported until registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard simple / advanced / cloud converters.
    pub fn with_defaults(
        models: ModelConfig,
        service: &ServiceConfig,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        Self::new()
            .register(ConversionMode::Simple, Arc::new(SimpleConverter::new()))
            .register(
                ConversionMode::Advanced,
                Arc::new(AdvancedConverter::with_mineru(models, registry, service)),
            )
            .register(ConversionMode::Cloud, Arc::new(CloudConverter))
    }

    /// Register (or replace) the converter for `mode`.
    pub fn register(mut self, mode: ConversionMode, converter: Arc<dyn DocumentConverter>) -> Self {
        self.converters.insert(mode, converter);
        self
    }

    /// Modes with a registered converter.
    pub fn modes(&self) -> Vec<ConversionMode> {
        ConversionMode::ALL
            .into_iter()
            .filter(|m| self.converters.contains_key(m))
            .collect()
    }

    /// The converter registered for `mode`.
    pub fn converter(&self, mode: ConversionMode) -> Result<&Arc<dyn DocumentConverter>, MarkifyError> {
        self.converters
            .get(&mode)
            .ok_or_else(|| MarkifyError::UnsupportedMode {
                mode: mode.to_string(),
            })
    }

    /// Convert `path` with the converter registered for `mode`.
    ///
    /// Results and converter errors pass through unchanged. A converter that
    /// declines the format produces [`MarkifyError::UnsupportedFormat`].
    pub async fn convert(
        &self,
        mode: ConversionMode,
        path: &Path,
        format: DocumentFormat,
    ) -> Result<ConversionResult, MarkifyError> {
        let converter = self.converter(mode)?;
        debug!(%mode, %format, converter = converter.name(), path = %path.display(), "Routing conversion");

        match converter.try_convert(path, format).await? {
            Some(result) => Ok(result),
            None => Err(MarkifyError::UnsupportedFormat {
                converter: converter.name().to_string(),
                format: format.to_string(),
            }),
        }
    }

    /// Like [`convert`](Self::convert) but takes the mode as a string.
    ///
    /// An unrecognised mode fails before any converter runs.
    pub async fn convert_named(
        &self,
        mode: &str,
        path: &Path,
        format: DocumentFormat,
    ) -> Result<ConversionResult, MarkifyError> {
        let mode: ConversionMode = mode.parse()?;
        self.convert(mode, path, format).await
    }
}
