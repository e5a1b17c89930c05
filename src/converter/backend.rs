//! Layout/OCR backend used by the advanced converter.
//!
//! The backend takes a PDF plus a provisioned [`ModelBundle`], decides
//! whether the document needs OCR or has a usable text layer, and writes
//! Markdown plus an `images/` directory into an output directory it owns.
//!
//! [`MineruCliBackend`] drives the MinerU `magic-pdf` command:
//!
//! ```text
//! magic-pdf -p <pdf> -o <out_dir> -m auto
//!   env MINERU_TOOLS_CONFIG_JSON=<bundle.config_path>
//!
//! <out_dir>/<stem>/{auto|ocr|txt}/<stem>.md
//! <out_dir>/<stem>/{auto|ocr|txt}/images/
//! ```
//!
//! The config path is set on the child process only; this process's
//! environment is left alone.

use crate::config::CONFIG_PATH_ENV;
use crate::error::MarkifyError;
use crate::models::ModelBundle;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Name of the MinerU executable looked up on `PATH`.
pub const MAGIC_PDF: &str = "magic-pdf";

/// Parse-method directories the backend may write, in lookup order.
const PARSE_METHODS: [&str; 3] = ["auto", "ocr", "txt"];

/// Number of stderr lines kept in a failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Files produced by one backend run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOutput {
    pub markdown_path: PathBuf,
    pub images_dir: Option<PathBuf>,
}

/// A layout-aware PDF extraction engine.
#[async_trait]
pub trait LayoutBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Fail with [`MarkifyError::BackendUnavailable`] if the backend cannot
    /// run at all. Called before models are provisioned.
    async fn check_available(&self) -> Result<(), MarkifyError>;

    /// Process `pdf` into `out_dir`.
    async fn process(
        &self,
        pdf: &Path,
        bundle: &ModelBundle,
        out_dir: &Path,
    ) -> Result<BackendOutput, MarkifyError>;
}

/// Runs the MinerU `magic-pdf` command as a child process.
#[derive(Debug, Clone)]
pub struct MineruCliBackend {
    program: Option<PathBuf>,
    timeout: Duration,
}

impl MineruCliBackend {
    /// `program` overrides the `PATH` lookup of `magic-pdf`.
    pub fn new(program: Option<PathBuf>, timeout: Duration) -> Self {
        Self { program, timeout }
    }

    fn resolve_program(&self) -> Result<PathBuf, MarkifyError> {
        match &self.program {
            Some(p) if p.is_file() => Ok(p.clone()),
            Some(p) => Err(MarkifyError::BackendUnavailable {
                reason: format!("'{}' does not exist", p.display()),
            }),
            None => which::which(MAGIC_PDF).map_err(|e| MarkifyError::BackendUnavailable {
                reason: format!("{MAGIC_PDF} not found on PATH ({e})"),
            }),
        }
    }
}

#[async_trait]
impl LayoutBackend for MineruCliBackend {
    fn name(&self) -> &str {
        MAGIC_PDF
    }

    async fn check_available(&self) -> Result<(), MarkifyError> {
        self.resolve_program().map(|_| ())
    }

    async fn process(
        &self,
        pdf: &Path,
        bundle: &ModelBundle,
        out_dir: &Path,
    ) -> Result<BackendOutput, MarkifyError> {
        let program = self.resolve_program()?;
        info!(
            program = %program.display(),
            pdf = %pdf.display(),
            device = %bundle.device,
            "Running layout backend"
        );

        let child = Command::new(&program)
            .arg("-p")
            .arg(pdf)
            .arg("-o")
            .arg(out_dir)
            .arg("-m")
            .arg("auto")
            .env(CONFIG_PATH_ENV, &bundle.config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    MarkifyError::BackendUnavailable {
                        reason: format!("cannot start '{}': {e}", program.display()),
                    }
                }
                _ => MarkifyError::BackendFailed {
                    detail: format!("cannot start '{}': {e}", program.display()),
                },
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| MarkifyError::BackendTimeout {
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| MarkifyError::BackendFailed {
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(MarkifyError::BackendFailed {
                detail: format!(
                    "{MAGIC_PDF} exited with {}\n{}",
                    output.status,
                    stderr_tail(&output.stderr)
                ),
            });
        }

        let stem = pdf
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let found = locate_output(out_dir, &stem).ok_or_else(|| MarkifyError::BackendFailed {
            detail: format!(
                "{MAGIC_PDF} finished but wrote no Markdown under '{}'",
                out_dir.display()
            ),
        })?;
        debug!(markdown = %found.markdown_path.display(), "Backend output located");
        Ok(found)
    }
}

/// Find the Markdown written for `stem` under `out_dir`.
///
/// Checks the known `<stem>/<method>/<stem>.md` layout first, then falls
/// back to the first `.md` file anywhere below `out_dir`.
pub fn locate_output(out_dir: &Path, stem: &str) -> Option<BackendOutput> {
    let known = PARSE_METHODS
        .iter()
        .map(|method| out_dir.join(stem).join(method).join(format!("{stem}.md")))
        .find(|p| p.is_file());

    let markdown_path = known.or_else(|| find_markdown(out_dir, 4))?;
    let images = markdown_path.parent().map(|p| p.join("images"));
    Some(BackendOutput {
        images_dir: images.filter(|p| p.is_dir()),
        markdown_path,
    })
}

fn find_markdown(dir: &Path, depth: usize) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    if let Some(md) = entries
        .iter()
        .find(|p| p.is_file() && p.extension().is_some_and(|e| e == "md"))
    {
        return Some(md.clone());
    }
    if depth == 0 {
        return None;
    }
    entries
        .iter()
        .filter(|p| p.is_dir())
        .find_map(|p| find_markdown(p, depth - 1))
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locates_auto_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("paper/auto");
        std::fs::create_dir_all(dir.join("images")).unwrap();
        std::fs::write(dir.join("paper.md"), "# Paper\n").unwrap();

        let out = locate_output(tmp.path(), "paper").unwrap();
        assert_eq!(out.markdown_path, dir.join("paper.md"));
        assert_eq!(out.images_dir, Some(dir.join("images")));
    }

    #[test]
    fn locates_ocr_layout_without_images() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("scan/ocr");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("scan.md"), "text\n").unwrap();

        let out = locate_output(tmp.path(), "scan").unwrap();
        assert_eq!(out.markdown_path, dir.join("scan.md"));
        assert_eq!(out.images_dir, None);
    }

    #[test]
    fn falls_back_to_any_markdown() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("renamed/v2");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("out.md"), "x\n").unwrap();

        let out = locate_output(tmp.path(), "doc").unwrap();
        assert_eq!(out.markdown_path, dir.join("out.md"));
    }

    #[test]
    fn nothing_written_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(locate_output(tmp.path(), "doc").is_none());
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let input: String = (0..30).map(|i| format!("line {i}\n")).collect();
        let tail = stderr_tail(input.as_bytes());
        assert!(tail.starts_with("line 10"));
        assert!(tail.ends_with("line 29"));
    }

    #[tokio::test]
    async fn missing_explicit_program_is_unavailable() {
        let backend = MineruCliBackend::new(
            Some(PathBuf::from("/no/such/magic-pdf")),
            Duration::from_secs(5),
        );
        let err = backend.check_available().await.unwrap_err();
        assert!(matches!(err, MarkifyError::BackendUnavailable { .. }));
    }
}
