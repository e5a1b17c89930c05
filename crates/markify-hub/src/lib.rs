//! # markify-hub
//!
//! Materialise a full model repository snapshot from [Hugging Face](https://huggingface.co)
//! or [ModelScope](https://www.modelscope.cn) into a plain local directory.
//!
//! ## How it works
//!
//! On a call to [`HubClient::snapshot_download`]:
//!
//! 1. Takes an in-process lock keyed by the target directory.
//! 2. If the target already carries the [`COMPLETE_MARKER`] file, returns it
//!    untouched. No network access.
//! 3. Lists every file in the repository at the mirror's default revision.
//! 4. Streams each file into a sibling staging directory
//!    (`.<name>.partial-<pid>`), writes the marker last, then renames the
//!    staging directory onto the target in one step.
//!
//! A directory without the marker is never reported as a snapshot. Leftovers
//! from an interrupted run are replaced only after a new snapshot has fully
//! downloaded; a failed download leaves them as they were. Files are real
//! files, never symlinks into a shared blob store, so the result can be moved
//! or copied freely.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use markify_hub::{HubClient, Mirror};
//! use std::time::Duration;
//!
//! let hub = HubClient::new(Mirror::HuggingFace, Duration::from_secs(600)).unwrap();
//! let dir = Mirror::HuggingFace.default_cache_dir("hantian/layoutreader").unwrap();
//! hub.snapshot_download("hantian/layoutreader", &dir, Some(&|done, total| {
//!     if let Some(t) = total {
//!         eprint!("\r{done}/{t} bytes");
//!     }
//! })).unwrap();
//! ```
//!
//! ## Environment variable overrides
//!
//! - `HF_ENDPOINT`: alternative Hugging Face endpoint (e.g. a corporate proxy).
//! - `MODELSCOPE_ENDPOINT`: alternative ModelScope endpoint.

use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

// ── Public constants ─────────────────────────────────────────────────────────

/// File written inside a snapshot directory once every file is on disk.
pub const COMPLETE_MARKER: &str = ".markify-complete";

const HF_DEFAULT_ENDPOINT: &str = "https://huggingface.co";
const MS_DEFAULT_ENDPOINT: &str = "https://www.modelscope.cn";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by snapshot operations.
#[derive(Error, Debug)]
pub enum HubError {
    /// The HTTP client could not be constructed.
    #[error("HTTP client setup failed: {0}")]
    Client(String),

    /// The repository file listing could not be fetched or parsed.
    #[error("Failed to list files of '{repo}': {reason}")]
    Listing { repo: String, reason: String },

    /// The mirror reports no downloadable files for the repository.
    #[error("Repository '{repo}' has no files on {mirror}")]
    EmptyRepository { repo: String, mirror: Mirror },

    /// A single file download failed.
    #[error("Download failed for '{url}': {reason}")]
    Download { url: String, reason: String },

    /// A request exceeded its time budget.
    #[error("Request timed out after {secs}s: '{url}'")]
    Timeout { url: String, secs: u64 },

    /// A remote path would escape the snapshot directory.
    #[error("Refusing unsafe remote path '{path}'")]
    UnsafePath { path: String },

    /// Local filesystem failure while staging or publishing.
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> HubError + '_ {
    move |source| HubError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ── Mirror ───────────────────────────────────────────────────────────────────

/// Remote source of model repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mirror {
    HuggingFace,
    ModelScope,
}

impl Mirror {
    /// Endpoint used when no override is configured.
    pub fn default_endpoint(self) -> &'static str {
        match self {
            Mirror::HuggingFace => HF_DEFAULT_ENDPOINT,
            Mirror::ModelScope => MS_DEFAULT_ENDPOINT,
        }
    }

    /// Name of the environment variable that overrides the endpoint.
    pub fn endpoint_env(self) -> &'static str {
        match self {
            Mirror::HuggingFace => "HF_ENDPOINT",
            Mirror::ModelScope => "MODELSCOPE_ENDPOINT",
        }
    }

    /// Branch name the mirror uses for the latest revision.
    pub fn default_revision(self) -> &'static str {
        match self {
            Mirror::HuggingFace => "main",
            Mirror::ModelScope => "master",
        }
    }

    /// Conventional per-user cache location for `repo` on this mirror.
    ///
    /// - **Hugging Face**: `~/.cache/huggingface/hub/<repo>`
    /// - **ModelScope**: `~/.cache/modelscope/hub/<repo>`
    ///
    /// Returns `None` when the home directory cannot be determined.
    pub fn default_cache_dir(self, repo: &str) -> Option<PathBuf> {
        let base = match self {
            Mirror::HuggingFace => "huggingface",
            Mirror::ModelScope => "modelscope",
        };
        let mut dir = dirs::home_dir()?.join(".cache").join(base).join("hub");
        for part in repo.split('/').filter(|p| !p.is_empty()) {
            dir.push(part);
        }
        Some(dir)
    }
}

impl fmt::Display for Mirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mirror::HuggingFace => f.write_str("huggingface"),
            Mirror::ModelScope => f.write_str("modelscope"),
        }
    }
}

// ── Remote listing ───────────────────────────────────────────────────────────

/// One downloadable file of a repository snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    /// Size in bytes when the mirror reports it.
    pub size: Option<u64>,
}

#[derive(Deserialize)]
struct HfModelInfo {
    #[serde(default)]
    siblings: Vec<HfSibling>,
}

#[derive(Deserialize)]
struct HfSibling {
    rfilename: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Deserialize)]
struct MsListing {
    #[serde(rename = "Data")]
    data: Option<MsData>,
}

#[derive(Deserialize)]
struct MsData {
    #[serde(rename = "Files", default)]
    files: Vec<MsFile>,
}

#[derive(Deserialize)]
struct MsFile {
    #[serde(rename = "Path")]
    path: String,
    #[serde(rename = "Type", default)]
    kind: String,
    #[serde(rename = "Size", default)]
    size: Option<u64>,
}

/// Contents of [`COMPLETE_MARKER`].
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotMarker {
    repo: String,
    mirror: Mirror,
    revision: String,
    files: usize,
}

// ── In-process download locks ────────────────────────────────────────────────

static DIR_LOCKS: Lazy<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn dir_lock(target: &Path) -> Arc<Mutex<()>> {
    DIR_LOCKS
        .lock()
        .entry(target.to_path_buf())
        .or_default()
        .clone()
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Returns `true` if `dir` holds a completed snapshot.
pub fn is_complete(dir: &Path) -> bool {
    dir.join(COMPLETE_MARKER).is_file()
}

/// Blocking client for one mirror.
///
/// Every request carries a connect timeout and the per-request timeout given
/// at construction; a request that exceeds it fails with [`HubError::Timeout`].
#[derive(Debug, Clone)]
pub struct HubClient {
    mirror: Mirror,
    endpoint: String,
    request_timeout: Duration,
    http: reqwest::blocking::Client,
}

impl HubClient {
    /// Create a client for `mirror`, honouring the endpoint override variable.
    pub fn new(mirror: Mirror, request_timeout: Duration) -> Result<Self, HubError> {
        let endpoint = std::env::var(mirror.endpoint_env())
            .ok()
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| mirror.default_endpoint().to_string());
        Self::with_endpoint(mirror, endpoint, request_timeout)
    }

    /// Create a client against an explicit endpoint.
    pub fn with_endpoint(
        mirror: Mirror,
        endpoint: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, HubError> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(concat!("markify-hub/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(10))
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| HubError::Client(e.to_string()))?;

        Ok(Self {
            mirror,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            request_timeout,
            http,
        })
    }

    pub fn mirror(&self) -> Mirror {
        self.mirror
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// List every file of `repo` at the mirror's default revision.
    pub fn list_files(&self, repo: &str) -> Result<Vec<RemoteFile>, HubError> {
        let url = self.listing_url(repo)?;
        debug!(%url, "Listing repository files");

        let response = self.get(&url)?;
        let files = match self.mirror {
            Mirror::HuggingFace => {
                let info: HfModelInfo = response.json().map_err(|e| HubError::Listing {
                    repo: repo.to_string(),
                    reason: e.to_string(),
                })?;
                info.siblings
                    .into_iter()
                    .map(|s| RemoteFile {
                        path: s.rfilename,
                        size: s.size,
                    })
                    .collect::<Vec<_>>()
            }
            Mirror::ModelScope => {
                let listing: MsListing = response.json().map_err(|e| HubError::Listing {
                    repo: repo.to_string(),
                    reason: e.to_string(),
                })?;
                listing
                    .data
                    .map(|d| d.files)
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|f| f.kind.is_empty() || f.kind == "blob")
                    .map(|f| RemoteFile {
                        path: f.path,
                        size: f.size,
                    })
                    .collect()
            }
        };

        for file in &files {
            validate_remote_path(&file.path)?;
        }
        Ok(files)
    }

    /// Download the full snapshot of `repo` into `target_dir`.
    ///
    /// Idempotent: a completed snapshot is returned without network access.
    /// Concurrent callers in the same process with the same `target_dir`
    /// are serialised, so only the first one downloads.
    ///
    /// `on_progress` receives `(bytes_downloaded, total_bytes_option)` summed
    /// across all files of the snapshot.
    pub fn snapshot_download(
        &self,
        repo: &str,
        target_dir: &Path,
        on_progress: Option<&dyn Fn(u64, Option<u64>)>,
    ) -> Result<PathBuf, HubError> {
        let lock = dir_lock(target_dir);
        let _guard = lock.lock();

        if is_complete(target_dir) {
            debug!(dir = %target_dir.display(), "Snapshot already present");
            return Ok(target_dir.to_path_buf());
        }

        info!(repo, mirror = %self.mirror, dir = %target_dir.display(), "Downloading model snapshot");

        let files = self.list_files(repo)?;
        if files.is_empty() {
            return Err(HubError::EmptyRepository {
                repo: repo.to_string(),
                mirror: self.mirror,
            });
        }

        let staging = staging_dir(target_dir);
        if staging.exists() {
            remove_path(&staging)?;
        }
        std::fs::create_dir_all(&staging).map_err(io_err(&staging))?;

        if let Err(e) = self.fill_staging(repo, &files, &staging, on_progress) {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }

        publish(&staging, target_dir)?;
        info!(repo, files = files.len(), dir = %target_dir.display(), "Snapshot ready");
        Ok(target_dir.to_path_buf())
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn fill_staging(
        &self,
        repo: &str,
        files: &[RemoteFile],
        staging: &Path,
        on_progress: Option<&dyn Fn(u64, Option<u64>)>,
    ) -> Result<(), HubError> {
        let total = files
            .iter()
            .map(|f| f.size)
            .sum::<Option<u64>>()
            .filter(|t| *t > 0);
        let mut downloaded: u64 = 0;

        for file in files {
            let dest = staging.join(relative_path(&file.path));
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(io_err(parent))?;
            }
            let url = self.file_url(repo, &file.path)?;
            debug!(path = %file.path, "Fetching file");
            self.download_file(&url, &dest, &mut downloaded, total, on_progress)?;
        }

        let marker = SnapshotMarker {
            repo: repo.to_string(),
            mirror: self.mirror,
            revision: self.mirror.default_revision().to_string(),
            files: files.len(),
        };
        let marker_path = staging.join(COMPLETE_MARKER);
        let json = serde_json::to_vec_pretty(&marker).map_err(|e| HubError::Io {
            path: marker_path.clone(),
            source: std::io::Error::other(e),
        })?;
        std::fs::write(&marker_path, json).map_err(io_err(&marker_path))?;
        Ok(())
    }

    /// Streams one URL into `dest`, calling `on_progress` every 64 KiB.
    fn download_file(
        &self,
        url: &Url,
        dest: &Path,
        downloaded: &mut u64,
        total: Option<u64>,
        on_progress: Option<&dyn Fn(u64, Option<u64>)>,
    ) -> Result<(), HubError> {
        let mut response = self.get(url)?;
        let mut out = std::fs::File::create(dest).map_err(io_err(dest))?;
        let mut chunk = vec![0u8; 64 * 1024]; // 64 KiB

        loop {
            match response.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    out.write_all(&chunk[..n]).map_err(io_err(dest))?;
                    *downloaded += n as u64;
                    if let Some(cb) = on_progress {
                        cb(*downloaded, total);
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    return Err(self.timeout_error(url));
                }
                Err(e) => {
                    return Err(HubError::Download {
                        url: url.to_string(),
                        reason: format!("Read error: {e}"),
                    });
                }
            }
        }

        out.flush().map_err(io_err(dest))?;
        Ok(())
    }

    fn get(&self, url: &Url) -> Result<reqwest::blocking::Response, HubError> {
        let response = self.http.get(url.clone()).send().map_err(|e| {
            if e.is_timeout() {
                self.timeout_error(url)
            } else {
                HubError::Download {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        if !response.status().is_success() {
            return Err(HubError::Download {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }
        Ok(response)
    }

    fn timeout_error(&self, url: &Url) -> HubError {
        HubError::Timeout {
            url: url.to_string(),
            secs: self.request_timeout.as_secs(),
        }
    }

    fn base_url(&self) -> Result<Url, HubError> {
        Url::parse(&self.endpoint).map_err(|e| HubError::Client(format!(
            "invalid endpoint '{}': {e}",
            self.endpoint
        )))
    }

    fn listing_url(&self, repo: &str) -> Result<Url, HubError> {
        let mut url = self.base_url()?;
        let revision = self.mirror.default_revision();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| HubError::Client(format!("endpoint '{}' cannot be a base", self.endpoint)))?;
            segments.pop_if_empty();
            match self.mirror {
                Mirror::HuggingFace => {
                    segments.extend(["api", "models"]);
                    segments.extend(repo.split('/'));
                    segments.extend(["revision", revision]);
                }
                Mirror::ModelScope => {
                    segments.extend(["api", "v1", "models"]);
                    segments.extend(repo.split('/'));
                    segments.extend(["repo", "files"]);
                }
            }
        }
        if self.mirror == Mirror::ModelScope {
            url.query_pairs_mut()
                .append_pair("Revision", revision)
                .append_pair("Recursive", "true");
        }
        Ok(url)
    }

    fn file_url(&self, repo: &str, path: &str) -> Result<Url, HubError> {
        let mut url = self.base_url()?;
        let revision = self.mirror.default_revision();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| HubError::Client(format!("endpoint '{}' cannot be a base", self.endpoint)))?;
            segments.pop_if_empty();
            match self.mirror {
                Mirror::HuggingFace => {
                    segments.extend(repo.split('/'));
                    segments.extend(["resolve", revision]);
                    segments.extend(path.split('/'));
                }
                Mirror::ModelScope => {
                    segments.extend(["api", "v1", "models"]);
                    segments.extend(repo.split('/'));
                    segments.push("repo");
                }
            }
        }
        if self.mirror == Mirror::ModelScope {
            url.query_pairs_mut()
                .append_pair("Revision", revision)
                .append_pair("FilePath", path);
        }
        Ok(url)
    }
}

// ── Filesystem helpers ───────────────────────────────────────────────────────

/// Rejects absolute paths, `..`, and empty paths from a remote listing.
fn validate_remote_path(path: &str) -> Result<(), HubError> {
    let unsafe_path = || HubError::UnsafePath {
        path: path.to_string(),
    };
    if path.is_empty() || path.starts_with('/') || path.starts_with('\\') {
        return Err(unsafe_path());
    }
    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) => {}
            _ => return Err(unsafe_path()),
        }
    }
    if path.split('/').any(|seg| seg == "..") {
        return Err(unsafe_path());
    }
    Ok(())
}

fn relative_path(path: &str) -> PathBuf {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn staging_dir(target: &Path) -> PathBuf {
    sibling_dir(target, "partial")
}

/// `.<name>.<tag>-<pid>` next to `target`.
fn sibling_dir(target: &Path, tag: &str) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!(".{name}.{tag}-{}", std::process::id()))
}

fn remove_path(path: &Path) -> Result<(), HubError> {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    result.map_err(io_err(path))
}

/// Renames the staging directory onto `target`.
///
/// An existing unmarked `target` is moved aside to a sibling backup first
/// and only removed once the staging directory is in place. If the swap
/// fails the backup is put back, so local files survive every failure.
///
/// Another process may have published the same snapshot in the meantime; in
/// that case its copy wins and the staging directory is discarded.
fn publish(staging: &Path, target: &Path) -> Result<(), HubError> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    let backup = if target.exists() && !is_complete(target) {
        let backup = sibling_dir(target, "previous");
        if backup.exists() {
            remove_path(&backup)?;
        }
        std::fs::rename(target, &backup).map_err(io_err(target))?;
        Some(backup)
    } else {
        None
    };

    match std::fs::rename(staging, target) {
        Ok(()) => {
            if let Some(backup) = backup {
                warn!(
                    dir = %target.display(),
                    "Replaced incomplete snapshot left by an earlier run"
                );
                if let Err(e) = remove_path(&backup) {
                    warn!(dir = %backup.display(), error = %e, "Could not remove previous snapshot");
                }
            }
            Ok(())
        }
        Err(_) if is_complete(target) => {
            debug!(dir = %target.display(), "Snapshot published concurrently; discarding ours");
            let _ = std::fs::remove_dir_all(staging);
            if let Some(backup) = backup {
                let _ = std::fs::remove_dir_all(backup);
            }
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::remove_dir_all(staging);
            if let Some(backup) = backup {
                if let Err(restore) = std::fs::rename(&backup, target) {
                    warn!(dir = %backup.display(), error = %restore, "Could not restore previous snapshot");
                }
            }
            Err(HubError::Io {
                path: target.to_path_buf(),
                source: e,
            })
        }
    }
}
