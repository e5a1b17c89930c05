//! Interchangeable document converters and the router that picks one.
//!
//! Every converter declares the [`DocumentFormat`]s it handles. Asking a
//! converter about any other format is answered with `Ok(None)` ("does not
//! apply"), never with an error; an `Err` always means the converter tried
//! and failed. The [`router::ConverterRouter`] turns a decline into
//! [`MarkifyError::UnsupportedFormat`] so callers see one consistent signal.
//!
//! | Mode       | Converter                        | Formats |
//! |------------|----------------------------------|---------|
//! | `simple`   | [`simple::SimpleConverter`]      | pdf     |
//! | `advanced` | [`advanced::AdvancedConverter`]  | pdf     |
//! | `cloud`    | [`cloud::CloudConverter`]        | pdf     |

pub mod advanced;
pub mod backend;
pub mod cloud;
pub mod router;
pub mod simple;

use crate::error::MarkifyError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

// ── Formats ──────────────────────────────────────────────────────────────

/// Input document type, used to match inputs against converter capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Pptx,
    Xlsx,
    Html,
    Markdown,
    Text,
    Image,
    Unknown,
}

impl DocumentFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Pptx => "pptx",
            DocumentFormat::Xlsx => "xlsx",
            DocumentFormat::Html => "html",
            DocumentFormat::Markdown => "markdown",
            DocumentFormat::Text => "text",
            DocumentFormat::Image => "image",
            DocumentFormat::Unknown => "unknown",
        }
    }

    /// Map a file extension (without the dot, any case) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let format = match ext.to_ascii_lowercase().as_str() {
            "pdf" => DocumentFormat::Pdf,
            "docx" => DocumentFormat::Docx,
            "pptx" => DocumentFormat::Pptx,
            "xlsx" => DocumentFormat::Xlsx,
            "html" | "htm" => DocumentFormat::Html,
            "md" | "markdown" => DocumentFormat::Markdown,
            "txt" | "text" => DocumentFormat::Text,
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "tif" | "tiff" | "webp" => {
                DocumentFormat::Image
            }
            _ => return None,
        };
        Some(format)
    }

    /// Detect the format of a local file.
    ///
    /// The extension decides when it is recognised. Otherwise the first bytes
    /// are sniffed; anything unrecognisable is [`DocumentFormat::Unknown`].
    pub async fn detect(path: &Path) -> Self {
        if let Some(format) = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
        {
            return format;
        }

        let mut head = [0u8; 512];
        let n = match tokio::fs::File::open(path).await {
            Ok(mut file) => file.read(&mut head).await.unwrap_or(0),
            Err(_) => 0,
        };
        Self::sniff(&head[..n])
    }

    /// Guess a format from leading bytes.
    pub fn sniff(head: &[u8]) -> Self {
        if head.starts_with(b"%PDF") {
            return DocumentFormat::Pdf;
        }
        if head.starts_with(b"\x89PNG") || head.starts_with(b"\xFF\xD8\xFF") {
            return DocumentFormat::Image;
        }
        let text = String::from_utf8_lossy(head).trim_start().to_ascii_lowercase();
        if text.starts_with("<!doctype html") || text.starts_with("<html") {
            return DocumentFormat::Html;
        }
        DocumentFormat::Unknown
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Result ───────────────────────────────────────────────────────────────

/// Normalised output of one conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResult {
    /// Document title, when the converter can determine one.
    pub title: Option<String>,
    /// The produced Markdown.
    pub text_content: String,
    /// Directory holding extracted images referenced by the Markdown.
    pub assets_dir: Option<PathBuf>,
}

impl ConversionResult {
    pub fn new(text_content: impl Into<String>) -> Self {
        Self {
            title: None,
            text_content: text_content.into(),
            assets_dir: None,
        }
    }
}

// ── Converter trait ──────────────────────────────────────────────────────

/// A strategy that turns one local file into Markdown.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Human-readable name used in errors and logs.
    fn name(&self) -> &'static str;

    /// Formats this converter handles.
    fn formats(&self) -> &'static [DocumentFormat];

    fn supports(&self, format: DocumentFormat) -> bool {
        self.formats().contains(&format)
    }

    /// Convert `path`, which the caller has already matched against
    /// [`formats`](Self::formats).
    async fn convert(
        &self,
        path: &Path,
        format: DocumentFormat,
    ) -> Result<ConversionResult, MarkifyError>;

    /// Convert if applicable. `Ok(None)` means the format is not handled.
    async fn try_convert(
        &self,
        path: &Path,
        format: DocumentFormat,
    ) -> Result<Option<ConversionResult>, MarkifyError> {
        if !self.supports(format) {
            return Ok(None);
        }
        self.convert(path, format).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn extension_wins() {
        assert_eq!(DocumentFormat::detect(Path::new("a/b/Report.PDF")).await, DocumentFormat::Pdf);
        assert_eq!(DocumentFormat::detect(Path::new("notes.md")).await, DocumentFormat::Markdown);
        assert_eq!(DocumentFormat::detect(Path::new("scan.jpeg")).await, DocumentFormat::Image);
    }

    #[tokio::test]
    async fn extensionless_pdf_is_sniffed() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"%PDF-1.7\n...").unwrap();
        f.flush().unwrap();
        assert_eq!(DocumentFormat::detect(f.path()).await, DocumentFormat::Pdf);
    }

    #[tokio::test]
    async fn unreadable_or_unknown_is_unknown() {
        assert_eq!(
            DocumentFormat::detect(Path::new("/definitely/not/here")).await,
            DocumentFormat::Unknown
        );
        assert_eq!(DocumentFormat::sniff(b"hello"), DocumentFormat::Unknown);
        assert_eq!(DocumentFormat::sniff(b"  <!DOCTYPE html>"), DocumentFormat::Html);
    }

    struct PdfOnly;

    #[async_trait]
    impl DocumentConverter for PdfOnly {
        fn name(&self) -> &'static str {
            "pdf-only"
        }
        fn formats(&self) -> &'static [DocumentFormat] {
            &[DocumentFormat::Pdf]
        }
        async fn convert(
            &self,
            _path: &Path,
            _format: DocumentFormat,
        ) -> Result<ConversionResult, MarkifyError> {
            Ok(ConversionResult::new("ok"))
        }
    }

    #[tokio::test]
    async fn try_convert_declines_other_formats() {
        let c = PdfOnly;
        let none = c.try_convert(Path::new("x.docx"), DocumentFormat::Docx).await.unwrap();
        assert!(none.is_none());
        let some = c.try_convert(Path::new("x.pdf"), DocumentFormat::Pdf).await.unwrap();
        assert_eq!(some.unwrap().text_content, "ok");
    }
}
