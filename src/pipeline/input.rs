//! Input staging: turn an upload or a URL into a file on local disk.
//!
//! Every converter works on a filesystem path, so both submission routes end
//! with a file in a per-job staging directory:
//!
//! ```text
//! upload bytes ──▶ stage_bytes ──▶ <staging>/<job-id>/<sanitised name>
//! http(s) URL  ──▶ fetch_url   ──▶ <staging>/<job-id>/<name from URL path>
//! ```
//!
//! The caller owns the directory and removes it once the job is terminal.

use crate::error::MarkifyError;
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Filename used when neither the upload nor the URL supplies one.
pub const FALLBACK_FILENAME: &str = "document";

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Parse an HTTP/HTTPS URL, rejecting every other scheme.
pub fn parse_url(input: &str) -> Result<Url, MarkifyError> {
    let invalid = || MarkifyError::InvalidInput {
        input: input.to_string(),
    };
    let url = Url::parse(input.trim()).map_err(|_| invalid())?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(invalid()),
    }
}

/// Reduce a client-supplied filename to a single safe path component.
///
/// Directory parts are dropped and anything outside `[A-Za-z0-9._-]` becomes
/// `_`. Names that end up empty or all dots fall back to
/// [`FALLBACK_FILENAME`].
pub fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.chars().all(|c| c == '.' || c == '_') {
        FALLBACK_FILENAME.to_string()
    } else {
        cleaned
    }
}

/// Write uploaded bytes to `dir/<sanitised filename>`.
pub async fn stage_bytes(dir: &Path, filename: &str, bytes: &[u8]) -> Result<PathBuf, MarkifyError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| MarkifyError::OutputWriteFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;
    let path = dir.join(sanitize_filename(filename));
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| MarkifyError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        })?;
    debug!(path = %path.display(), bytes = bytes.len(), "Staged upload");
    Ok(path)
}

/// Download `url` into `dest_dir` and return the local path.
///
/// Non-2xx responses and transport errors are [`MarkifyError::DownloadFailed`];
/// exceeding `timeout_secs` is [`MarkifyError::DownloadTimeout`].
pub async fn fetch_url(url: &str, dest_dir: &Path, timeout_secs: u64) -> Result<PathBuf, MarkifyError> {
    let parsed = parse_url(url)?;
    info!(url, "Fetching document");

    let failed = |reason: String| MarkifyError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let classify = |e: reqwest::Error| {
        if e.is_timeout() {
            MarkifyError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(parsed.clone()).send().await.map_err(classify)?;
    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(classify)?;

    tokio::fs::create_dir_all(dest_dir)
        .await
        .map_err(|e| MarkifyError::OutputWriteFailed {
            path: dest_dir.to_path_buf(),
            source: e,
        })?;
    let path = dest_dir.join(filename_from_url(&parsed));
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| MarkifyError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        })?;

    info!(path = %path.display(), bytes = bytes.len(), "Fetched document");
    Ok(path)
}

/// Last non-empty path segment of the URL, sanitised.
pub fn filename_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(sanitize_filename)
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}
