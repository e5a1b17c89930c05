//! Fast raw-text PDF conversion.
//!
//! Uses `lopdf` to pull the text operators out of every page in document
//! order. There is no layout analysis: columns, tables, and figures come out
//! as plain lines. Parsing is CPU-bound and runs in `spawn_blocking`.
//!
//! The conversion is all-or-nothing. If any page fails to decode, the whole
//! document fails with the parser's message and nothing is returned.

use super::{ConversionResult, DocumentConverter, DocumentFormat};
use crate::error::MarkifyError;
use crate::pipeline::postprocess;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

const NAME: &str = "Simple PDF";

/// How far into the file the `%PDF-` header may appear.
const HEADER_WINDOW: usize = 1024;

/// Raw-text PDF converter.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleConverter;

impl SimpleConverter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentConverter for SimpleConverter {
    fn name(&self) -> &'static str {
        NAME
    }

    fn formats(&self) -> &'static [DocumentFormat] {
        &[DocumentFormat::Pdf]
    }

    async fn convert(
        &self,
        path: &Path,
        _format: DocumentFormat,
    ) -> Result<ConversionResult, MarkifyError> {
        let path = path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || extract_text(&path))
            .await
            .map_err(|e| MarkifyError::Internal(format!("PDF parse task: {e}")))??;

        Ok(ConversionResult::new(postprocess::clean_text(&text)))
    }
}

/// Read `path` and extract the text of every page.
pub fn extract_text(path: &Path) -> Result<String, MarkifyError> {
    let _span = tracing::info_span!("converter.simple", path = %path.display()).entered();

    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => MarkifyError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => failed(e),
    })?;
    check_header(path, &bytes)?;

    let doc = lopdf::Document::load_mem(&bytes).map_err(failed)?;
    let pages = doc.get_pages();
    debug!(pages = pages.len(), "Parsed PDF");

    let mut text = String::new();
    for page_num in pages.keys() {
        let page_text = doc.extract_text(&[*page_num]).map_err(|e| MarkifyError::ConversionFailed {
            converter: NAME.into(),
            detail: format!("page {page_num}: {e}"),
        })?;
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        text.push_str(page_text.trim_end());
    }
    Ok(text)
}

fn check_header(path: &Path, bytes: &[u8]) -> Result<(), MarkifyError> {
    let window = &bytes[..bytes.len().min(HEADER_WINDOW)];
    if window.windows(5).any(|w| w == b"%PDF-") {
        return Ok(());
    }
    Err(MarkifyError::NotAPdf {
        path: PathBuf::from(path),
        magic: bytes.iter().take(4).copied().collect(),
    })
}

fn failed(e: impl std::fmt::Display) -> MarkifyError {
    MarkifyError::ConversionFailed {
        converter: NAME.into(),
        detail: e.to_string(),
    }
}
