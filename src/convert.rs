//! Direct (non-job) conversion entry points.
//!
//! These run a conversion in the caller's task and return the result or the
//! error as-is. The CLI uses them; the HTTP service goes through
//! [`crate::jobs::JobManager`] instead, which wraps the same router call.

use crate::config::ConversionMode;
use crate::converter::router::ConverterRouter;
use crate::converter::{ConversionResult, DocumentFormat};
use crate::error::MarkifyError;
use crate::pipeline::input;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

/// Convert a local file or HTTP/HTTPS URL with the converter for `mode`.
///
/// URLs are downloaded into a temporary directory that is removed when this
/// function returns.
pub async fn convert(
    input_str: impl AsRef<str>,
    mode: ConversionMode,
    router: &ConverterRouter,
    fetch_timeout_secs: u64,
) -> Result<ConversionResult, MarkifyError> {
    let input_str = input_str.as_ref();
    let start = Instant::now();
    info!(input = input_str, %mode, "Starting conversion");

    let _download_dir;
    let path: PathBuf = if input::is_url(input_str) {
        let dir = tempfile::tempdir().map_err(|e| MarkifyError::Internal(format!("tempdir: {e}")))?;
        let fetched = input::fetch_url(input_str, dir.path(), fetch_timeout_secs).await?;
        _download_dir = dir;
        fetched
    } else {
        let path = PathBuf::from(input_str);
        if !path.is_file() {
            return Err(MarkifyError::FileNotFound { path });
        }
        path
    };

    let result = convert_path(&path, mode, router).await?;
    info!(
        chars = result.text_content.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Conversion complete"
    );
    Ok(result)
}

/// Convert an in-memory document (e.g. read from stdin).
///
/// The bytes go to a managed temp file that is deleted on return. Without a
/// filename the format is sniffed from the content.
pub async fn convert_from_bytes(
    bytes: &[u8],
    mode: ConversionMode,
    router: &ConverterRouter,
) -> Result<ConversionResult, MarkifyError> {
    if bytes.is_empty() {
        return Err(MarkifyError::EmptyPayload {
            filename: "<stdin>".into(),
        });
    }
    let mut tmp = tempfile::NamedTempFile::new()
        .map_err(|e| MarkifyError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| MarkifyError::Internal(format!("tempfile write: {e}")))?;
    convert_path(tmp.path(), mode, router).await
}

/// Blocking wrapper around [`convert`] for non-async callers.
pub fn convert_sync(
    input_str: impl AsRef<str>,
    mode: ConversionMode,
    router: &ConverterRouter,
    fetch_timeout_secs: u64,
) -> Result<ConversionResult, MarkifyError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| MarkifyError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(convert(input_str, mode, router, fetch_timeout_secs))
}

/// Write Markdown to `path` atomically (temp file, then rename).
pub async fn write_output(path: &Path, markdown: &str) -> Result<(), MarkifyError> {
    let write_err = |e: std::io::Error| MarkifyError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, markdown).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    info!(path = %path.display(), "Wrote output");
    Ok(())
}

async fn convert_path(
    path: &Path,
    mode: ConversionMode,
    router: &ConverterRouter,
) -> Result<ConversionResult, MarkifyError> {
    let format = DocumentFormat::detect(path).await;
    let result = router.convert(mode, path, format).await?;
    if result.text_content.trim().is_empty() {
        return Err(MarkifyError::EmptyOutput {
            path: path.to_path_buf(),
        });
    }
    Ok(result)
}
