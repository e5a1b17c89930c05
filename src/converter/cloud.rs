//! Placeholder for hosted conversion.

use super::{ConversionResult, DocumentConverter, DocumentFormat};
use crate::error::MarkifyError;
use async_trait::async_trait;
use std::path::Path;

/// Accepts PDFs and always fails with [`MarkifyError::NotImplemented`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CloudConverter;

#[async_trait]
impl DocumentConverter for CloudConverter {
    fn name(&self) -> &'static str {
        "Cloud PDF"
    }

    fn formats(&self) -> &'static [DocumentFormat] {
        &[DocumentFormat::Pdf]
    }

    async fn convert(
        &self,
        _path: &Path,
        _format: DocumentFormat,
    ) -> Result<ConversionResult, MarkifyError> {
        Err(MarkifyError::NotImplemented {
            feature: "Cloud PDF conversion".into(),
        })
    }
}
