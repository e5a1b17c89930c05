//! Shared helpers for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use lopdf::{dictionary, Document, Object, Stream};
use markify::{
    ConversionMode, ConversionResult, ConverterRouter, DocumentConverter, DocumentFormat, Job,
    JobId, JobManager, JobState, MarkifyError, ServiceConfig,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

// ── PDFs ─────────────────────────────────────────────────────────────────────

/// A one-page PDF whose text layer holds each of `lines`.
pub fn text_pdf(lines: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.new_object_id();
    let resources_id = doc.new_object_id();
    let content_id = doc.new_object_id();
    let page_id = doc.new_object_id();

    doc.objects.insert(
        font_id,
        Object::Dictionary(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
            "Encoding" => "WinAnsiEncoding",
        }),
    );
    doc.objects.insert(
        resources_id,
        Object::Dictionary(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        }),
    );

    let mut content = String::from("BT /F1 12 Tf 50 700 Td 14 TL\n");
    for line in lines {
        content.push_str(&format!("({line}) Tj T*\n"));
    }
    content.push_str("ET");
    doc.objects.insert(
        content_id,
        Object::Stream(Stream::new(dictionary! {}, content.into_bytes())),
    );

    doc.objects.insert(
        page_id,
        Object::Dictionary(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        }),
    );
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

pub fn hello_world_pdf() -> Vec<u8> {
    text_pdf(&["Hello World"])
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

// ── Managers ─────────────────────────────────────────────────────────────────

pub fn service_config(root: &Path) -> ServiceConfig {
    ServiceConfig::builder()
        .staging_dir(root.join("staging"))
        .output_dir(root.join("output"))
        .fetch_timeout_secs(10)
        .build()
        .unwrap()
}

/// Simple + cloud converters, no model-backed advanced mode.
pub fn basic_router() -> ConverterRouter {
    ConverterRouter::new()
        .register(
            ConversionMode::Simple,
            Arc::new(markify::converter::simple::SimpleConverter::new()),
        )
        .register(
            ConversionMode::Cloud,
            Arc::new(markify::converter::cloud::CloudConverter),
        )
}

pub fn manager(root: &Path, router: ConverterRouter) -> JobManager {
    JobManager::in_memory(router, service_config(root))
}

/// Poll until the job is terminal, recording every distinct state seen.
pub async fn wait_terminal(manager: &JobManager, id: JobId) -> (Job, Vec<JobState>) {
    let mut seen = Vec::new();
    for _ in 0..2000 {
        let job = manager.get_job(id).unwrap();
        if seen.last() != Some(&job.state()) {
            seen.push(job.state());
        }
        if job.state().is_terminal() {
            return (job, seen);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {id} did not finish; states seen: {seen:?}");
}

// ── Fake converters ──────────────────────────────────────────────────────────

/// Converter that blocks until released, so tests can observe `processing`.
#[derive(Default)]
pub struct GatedConverter {
    pub release: Notify,
    pub started: Notify,
    pub calls: AtomicUsize,
}

#[async_trait]
impl DocumentConverter for GatedConverter {
    fn name(&self) -> &'static str {
        "gated"
    }

    fn formats(&self) -> &'static [DocumentFormat] {
        &[DocumentFormat::Pdf, DocumentFormat::Text, DocumentFormat::Unknown]
    }

    async fn convert(
        &self,
        _path: &Path,
        _format: DocumentFormat,
    ) -> Result<ConversionResult, MarkifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.release.notified().await;
        Ok(ConversionResult::new("gated output\n"))
    }
}

/// Converter with a fixed, configurable outcome.
pub enum Scripted {
    Text(&'static str),
    Panic,
}

#[async_trait]
impl DocumentConverter for Scripted {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn formats(&self) -> &'static [DocumentFormat] {
        &[DocumentFormat::Pdf, DocumentFormat::Text, DocumentFormat::Unknown]
    }

    async fn convert(
        &self,
        _path: &Path,
        _format: DocumentFormat,
    ) -> Result<ConversionResult, MarkifyError> {
        match self {
            Scripted::Text(t) => Ok(ConversionResult::new(*t)),
            Scripted::Panic => panic!("converter exploded"),
        }
    }
}
