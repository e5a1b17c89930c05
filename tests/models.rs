//! Advanced-mode tests: model provisioning against a mock mirror and a fake
//! layout backend standing in for `magic-pdf`.

mod common;

use async_trait::async_trait;
use common::{hello_world_pdf, service_config, wait_terminal};
use markify::converter::advanced::AdvancedConverter;
use markify::converter::backend::{BackendOutput, LayoutBackend};
use markify::{
    ConversionMode, ConverterRouter, ErrorKind, JobManager, JobState, MarkifyError, ModelBundle,
    ModelConfig, ModelRegistry,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BACKEND_MARKDOWN: &str = "# Test Paper\n# Abstract\nWe test.   \n\n# 1 Introduction\r\nHello World\n\n# 1.1 Background\n\n![](images/fig1.png)\n\n\n";

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Serve both model repositories. Every file must be fetched `expected` times.
async fn mount_mirror(server: &MockServer, expected: u64) {
    let repos: [(&str, &[(&str, &str)]); 2] = [
        (
            "opendatalab/PDF-Extract-Kit-1.0",
            &[
                ("README.md", "# PDF-Extract-Kit"),
                ("models/Layout/model.pt", "layout-weights"),
            ],
        ),
        ("hantian/layoutreader", &[("config.json", "{\"layers\":2}")]),
    ];

    for (repo, files) in repos {
        let siblings: Vec<Value> = files
            .iter()
            .map(|(name, _)| serde_json::json!({ "rfilename": name }))
            .collect();
        Mock::given(method("GET"))
            .and(path(format!("/api/models/{repo}/revision/main")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "id": repo, "siblings": siblings })),
            )
            .expect(expected)
            .mount(server)
            .await;
        for (name, body) in files.iter() {
            Mock::given(method("GET"))
                .and(path(format!("/{repo}/resolve/main/{name}")))
                .respond_with(ResponseTemplate::new(200).set_body_string(*body))
                .expect(expected)
                .mount(server)
                .await;
        }
    }
}

fn model_config(server: &MockServer, root: &Path) -> ModelConfig {
    ModelConfig::builder()
        .models_dir(root.join("models"))
        .config_path(root.join("magic-pdf.json"))
        .hub_endpoint(server.uri())
        .build()
        .unwrap()
}

/// Writes canned Markdown plus an image, the way `magic-pdf` lays out a run.
#[derive(Default)]
struct FakeBackend {
    available: bool,
    runs: Mutex<Vec<(PathBuf, ModelBundle)>>,
}

impl FakeBackend {
    fn installed() -> Self {
        Self {
            available: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl LayoutBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn check_available(&self) -> Result<(), MarkifyError> {
        if self.available {
            Ok(())
        } else {
            Err(MarkifyError::BackendUnavailable {
                reason: "fake backend is not installed".into(),
            })
        }
    }

    async fn process(
        &self,
        pdf: &Path,
        bundle: &ModelBundle,
        out_dir: &Path,
    ) -> Result<BackendOutput, MarkifyError> {
        assert!(bundle.config_path.is_file(), "config must be published before the run");
        let stem = pdf.file_stem().unwrap().to_string_lossy().into_owned();
        let run_dir = out_dir.join(&stem).join("auto");
        let images = run_dir.join("images");
        std::fs::create_dir_all(&images).unwrap();
        std::fs::write(images.join("fig1.png"), b"\x89PNG").unwrap();
        let markdown_path = run_dir.join(format!("{stem}.md"));
        std::fs::write(&markdown_path, BACKEND_MARKDOWN).unwrap();

        self.runs.lock().push((out_dir.to_path_buf(), bundle.clone()));
        Ok(BackendOutput {
            markdown_path,
            images_dir: Some(images),
        })
    }
}

fn advanced_manager(
    root: &Path,
    models: ModelConfig,
    backend: Arc<FakeBackend>,
) -> JobManager {
    let config = service_config(root);
    let converter = AdvancedConverter::new(
        models,
        Arc::new(ModelRegistry::new()),
        backend,
        config.output_dir.clone(),
    );
    let router = ConverterRouter::new().register(ConversionMode::Advanced, Arc::new(converter));
    JobManager::in_memory(router, config)
}

// ── Provisioning ─────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_advanced_jobs_share_one_download() {
    let server = MockServer::start().await;
    mount_mirror(&server, 1).await;
    let tmp = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::installed());
    let jobs = advanced_manager(tmp.path(), model_config(&server, tmp.path()), backend.clone());

    let pdf = hello_world_pdf();
    let a = jobs.submit_bytes("paper.pdf", &pdf, ConversionMode::Advanced).await.unwrap();
    let b = jobs.submit_bytes("paper.pdf", &pdf, ConversionMode::Advanced).await.unwrap();
    let (ja, _) = wait_terminal(&jobs, a).await;
    let (jb, _) = wait_terminal(&jobs, b).await;

    assert_eq!(ja.state(), JobState::Completed, "error: {:?}", ja.error());
    assert_eq!(jb.state(), JobState::Completed, "error: {:?}", jb.error());

    let runs = backend.runs.lock().clone();
    assert_eq!(runs.len(), 2);
    assert_ne!(runs[0].0, runs[1].0, "each run needs its own output directory");
    assert_eq!(runs[0].1, runs[1].1);

    let bundle = &runs[0].1;
    assert_eq!(bundle.main, tmp.path().join("models/main/models"));
    assert_eq!(bundle.layout, tmp.path().join("models/layout"));
    assert!(bundle.main.join("Layout/model.pt").is_file());
    assert!(bundle.layout.join("config.json").is_file());
    // `expect(1)` on every mirror route is verified when the server drops.
}

#[tokio::test(flavor = "multi_thread")]
async fn published_config_points_at_models() {
    let server = MockServer::start().await;
    mount_mirror(&server, 1).await;
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(
        tmp.path().join("magic-pdf.json"),
        r#"{"bucket_info": {"bucket-name": ["ak", "sk", "endpoint"]}, "device-mode": "cuda"}"#,
    )
    .unwrap();

    let models = model_config(&server, tmp.path());
    let registry = ModelRegistry::new();
    let bundle = registry.bundle(&models).await.unwrap();

    let record: Value =
        serde_json::from_str(&std::fs::read_to_string(&bundle.config_path).unwrap()).unwrap();
    assert_eq!(record["device-mode"], "cpu");
    assert_eq!(record["models-dir"], bundle.main.display().to_string());
    assert_eq!(record["layoutreader-model-dir"], bundle.layout.display().to_string());
    assert_eq!(record["config_version"], markify::models::CONFIG_VERSION);
    assert_eq!(record["bucket_info"]["bucket-name"][0], "ak");

    // Cached for the same configuration: no second round of requests.
    assert_eq!(registry.cached(&models), Some(bundle.clone()));
    assert_eq!(registry.bundle(&models).await.unwrap(), bundle);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_provisioning_fails_the_job_and_is_retried() {
    let server = MockServer::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::installed());
    let jobs = advanced_manager(tmp.path(), model_config(&server, tmp.path()), backend.clone());

    // No routes mounted yet: every listing is a 404.
    let first = jobs
        .submit_bytes("paper.pdf", &hello_world_pdf(), ConversionMode::Advanced)
        .await
        .unwrap();
    let (job, _) = wait_terminal(&jobs, first).await;
    assert_eq!(job.state(), JobState::Failed);
    assert_eq!(job.error().unwrap().kind, ErrorKind::ModelProvisioning);
    assert!(backend.runs.lock().is_empty());

    mount_mirror(&server, 1).await;
    let second = jobs
        .submit_bytes("paper.pdf", &hello_world_pdf(), ConversionMode::Advanced)
        .await
        .unwrap();
    let (job, _) = wait_terminal(&jobs, second).await;
    assert_eq!(job.state(), JobState::Completed, "error: {:?}", job.error());
}

// ── Conversion output ────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn advanced_output_is_cleaned_and_leveled() {
    let server = MockServer::start().await;
    mount_mirror(&server, 1).await;
    let tmp = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::installed());
    let jobs = advanced_manager(tmp.path(), model_config(&server, tmp.path()), backend.clone());

    let id = jobs
        .submit_bytes("paper.pdf", &hello_world_pdf(), ConversionMode::Advanced)
        .await
        .unwrap();
    let (job, _) = wait_terminal(&jobs, id).await;
    let result = job.result().unwrap();

    assert_eq!(result.title.as_deref(), Some("paper"));
    assert_eq!(
        result.text_content,
        "# Test Paper\n\n## Abstract\n\nWe test.\n\n## 1 Introduction\n\nHello World\n\n### 1.1 Background\n\n![](images/fig1.png)\n"
    );

    let assets = result.assets_dir.as_ref().unwrap();
    assert!(assets.join("fig1.png").is_file());
    assert!(assets.starts_with(tmp.path().join("output")));
    let written = std::fs::read_to_string(assets.parent().unwrap().join("paper.md")).unwrap();
    assert_eq!(written, result.text_content);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_backend_fails_before_downloading() {
    let server = MockServer::start().await;
    mount_mirror(&server, 0).await;
    let tmp = tempfile::tempdir().unwrap();
    let backend = Arc::new(FakeBackend::default());
    let jobs = advanced_manager(tmp.path(), model_config(&server, tmp.path()), backend);

    let id = jobs
        .submit_bytes("paper.pdf", &hello_world_pdf(), ConversionMode::Advanced)
        .await
        .unwrap();
    let (job, _) = wait_terminal(&jobs, id).await;

    assert_eq!(job.state(), JobState::Failed);
    let failure = job.error().unwrap();
    assert_eq!(failure.kind, ErrorKind::BackendUnavailable);
    assert!(failure.message.contains("not installed"));
    assert!(!tmp.path().join("magic-pdf.json").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn non_pdf_is_declined_in_advanced_mode() {
    let server = MockServer::start().await;
    mount_mirror(&server, 0).await;
    let tmp = tempfile::tempdir().unwrap();
    let jobs = advanced_manager(
        tmp.path(),
        model_config(&server, tmp.path()),
        Arc::new(FakeBackend::installed()),
    );

    let id = jobs
        .submit_bytes("slides.pptx", b"PK\x03\x04", ConversionMode::Advanced)
        .await
        .unwrap();
    let (job, _) = wait_terminal(&jobs, id).await;
    assert_eq!(job.error().unwrap().kind, ErrorKind::UnsupportedFormat);
}
