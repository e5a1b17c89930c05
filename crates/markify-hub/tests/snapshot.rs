//! Snapshot download behaviour against a local mock mirror.

use markify_hub::{is_complete, HubClient, HubError, Mirror, COMPLETE_MARKER};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Test helpers ─────────────────────────────────────────────────────────────

async fn hf_repo(server: &MockServer, expected_downloads: u64) {
    Mock::given(method("GET"))
        .and(path("/api/models/org/tiny/revision/main"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "org/tiny",
            "siblings": [
                { "rfilename": "config.json" },
                { "rfilename": "models/weights.bin" }
            ]
        })))
        .expect(expected_downloads)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/org/tiny/resolve/main/config.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"layers\":2}"))
        .expect(expected_downloads)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/org/tiny/resolve/main/models/weights.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 1024]))
        .expect(expected_downloads)
        .mount(server)
        .await;
}

/// `reqwest::blocking::Client` owns an inner runtime and cannot be built on
/// an async test thread, so construct the client on a plain OS thread.
fn client(mirror: Mirror, endpoint: impl Into<String>, timeout: Duration) -> HubClient {
    let endpoint = endpoint.into();
    std::thread::spawn(move || HubClient::with_endpoint(mirror, endpoint, timeout).unwrap())
        .join()
        .unwrap()
}

fn hf_client(server: &MockServer) -> HubClient {
    client(Mirror::HuggingFace, server.uri(), Duration::from_secs(10))
}

async fn download(hub: HubClient, repo: &'static str, dir: PathBuf) -> Result<PathBuf, HubError> {
    tokio::task::spawn_blocking(move || hub.snapshot_download(repo, &dir, None))
        .await
        .unwrap()
}

// ── Hugging Face ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn downloads_full_snapshot_with_marker() {
    let server = MockServer::start().await;
    hf_repo(&server, 1).await;
    let tmp = tempfile::tempdir().unwrap();
    let target = tmp.path().join("tiny");

    let dir = download(hf_client(&server), "org/tiny", target.clone())
        .await
        .unwrap();

    assert_eq!(dir, target);
    assert!(is_complete(&dir));
    assert_eq!(
        std::fs::read_to_string(dir.join("config.json")).unwrap(),
        "{\"layers\":2}"
    );
    assert_eq!(
        std::fs::read(dir.join("models/weights.bin")).unwrap().len(),
        1024
    );
    assert!(!dir.join("models/weights.bin").is_symlink());
}

#[tokio::test]
async fn second_call_does_not_touch_network() {
    let server = MockServer::start().await;
    hf_repo(&server, 1).await;
    let tmp = tempfile::tempdir().unwrap();
    let target = tmp.path().join("tiny");

    download(hf_client(&server), "org/tiny", target.clone())
        .await
        .unwrap();
    download(hf_client(&server), "org/tiny", target.clone())
        .await
        .unwrap();
    // `expect(1)` on each mock is verified when the server drops.
}

#[tokio::test]
async fn concurrent_callers_download_once() {
    let server = MockServer::start().await;
    hf_repo(&server, 1).await;
    let tmp = tempfile::tempdir().unwrap();
    let target = tmp.path().join("tiny");

    let a = download(hf_client(&server), "org/tiny", target.clone());
    let b = download(hf_client(&server), "org/tiny", target.clone());
    let (ra, rb) = tokio::join!(a, b);

    assert!(ra.is_ok() && rb.is_ok());
    assert!(is_complete(&target));
}

#[tokio::test]
async fn incomplete_directory_is_replaced() {
    let server = MockServer::start().await;
    hf_repo(&server, 1).await;
    let tmp = tempfile::tempdir().unwrap();
    let target = tmp.path().join("tiny");
    std::fs::create_dir_all(&target).unwrap();
    std::fs::write(target.join("half-written.bin"), b"xx").unwrap();

    download(hf_client(&server), "org/tiny", target.clone())
        .await
        .unwrap();

    assert!(is_complete(&target));
    assert!(!target.join("half-written.bin").exists());
    // The moved-aside copy is gone once the new snapshot is in place.
    let entries: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn failed_file_leaves_no_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/models/org/broken/revision/main"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "siblings": [ { "rfilename": "ok.json" }, { "rfilename": "missing.bin" } ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/org/broken/resolve/main/ok.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/org/broken/resolve/main/missing.bin"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let target = tmp.path().join("broken");
    let err = download(hf_client(&server), "org/broken", target.clone())
        .await
        .unwrap_err();

    assert!(matches!(err, HubError::Download { .. }), "got: {err}");
    assert!(!target.exists());
    // Staging directory cleaned up as well.
    let leftovers: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn unreachable_mirror_keeps_existing_files() {
    let tmp = tempfile::tempdir().unwrap();
    let target = tmp.path().join("main");
    let weights = target.join("models/Layout/model.pt");
    std::fs::create_dir_all(weights.parent().unwrap()).unwrap();
    std::fs::write(&weights, b"weights").unwrap();

    let hub = client(Mirror::HuggingFace, "http://127.0.0.1:9", Duration::from_secs(5));
    let err = download(hub, "opendatalab/PDF-Extract-Kit-1.0", target.clone())
        .await
        .unwrap_err();

    assert!(
        matches!(err, HubError::Download { .. } | HubError::Timeout { .. }),
        "got: {err}"
    );
    assert_eq!(std::fs::read(&weights).unwrap(), b"weights");
    assert!(!is_complete(&target));
}

#[tokio::test]
async fn failed_file_keeps_existing_files() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/models/org/flaky/revision/main"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "siblings": [ { "rfilename": "missing.bin" } ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/org/flaky/resolve/main/missing.bin"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let target = tmp.path().join("flaky");
    std::fs::create_dir_all(&target).unwrap();
    std::fs::write(target.join("config.json"), b"{}").unwrap();

    download(hf_client(&server), "org/flaky", target.clone())
        .await
        .unwrap_err();

    assert_eq!(std::fs::read(target.join("config.json")).unwrap(), b"{}");
    let entries: Vec<_> = std::fs::read_dir(tmp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(entries, vec![std::ffi::OsString::from("flaky")]);
}

#[tokio::test]
async fn slow_mirror_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/models/org/slow/revision/main"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "siblings": [] }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let hub = client(Mirror::HuggingFace, server.uri(), Duration::from_millis(300));
    let tmp = tempfile::tempdir().unwrap();
    let err = download(hub, "org/slow", tmp.path().join("slow"))
        .await
        .unwrap_err();

    assert!(matches!(err, HubError::Timeout { .. }), "got: {err}");
}

#[tokio::test]
async fn unsafe_listing_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/models/org/evil/revision/main"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "siblings": [ { "rfilename": "../../outside.txt" } ]
        })))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let err = download(hf_client(&server), "org/evil", tmp.path().join("evil"))
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::UnsafePath { .. }), "got: {err}");
}

#[tokio::test]
async fn progress_reports_cumulative_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/models/org/sized/revision/main"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "siblings": [
                { "rfilename": "a.bin", "size": 100 },
                { "rfilename": "b.bin", "size": 50 }
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/org/sized/resolve/main/a.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 100]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/org/sized/resolve/main/b.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![2u8; 50]))
        .mount(&server)
        .await;

    let hub = hf_client(&server);
    let tmp = tempfile::tempdir().unwrap();
    let target = tmp.path().join("sized");
    let last = Arc::new(AtomicU64::new(0));
    let total_seen = Arc::new(AtomicU64::new(0));
    let (l, t) = (last.clone(), total_seen.clone());

    tokio::task::spawn_blocking(move || {
        hub.snapshot_download(
            "org/sized",
            &target,
            Some(&|done, total| {
                l.store(done, Ordering::SeqCst);
                t.store(total.unwrap_or(0), Ordering::SeqCst);
            }),
        )
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(last.load(Ordering::SeqCst), 150);
    assert_eq!(total_seen.load(Ordering::SeqCst), 150);
}

// ── ModelScope ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn modelscope_listing_skips_directories() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/models/org/ms/repo/files"))
        .and(query_param("Recursive", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Code": 200,
            "Data": { "Files": [
                { "Path": "models", "Type": "tree" },
                { "Path": "models/model.pt", "Type": "blob", "Size": 3 }
            ] },
            "Success": true
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/models/org/ms/repo"))
        .and(query_param("FilePath", "models/model.pt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"abc".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let hub = client(Mirror::ModelScope, server.uri(), Duration::from_secs(10));
    let tmp = tempfile::tempdir().unwrap();
    let dir = download(hub, "org/ms", tmp.path().join("ms")).await.unwrap();

    assert_eq!(std::fs::read(dir.join("models/model.pt")).unwrap(), b"abc");
    let marker = std::fs::read_to_string(dir.join(COMPLETE_MARKER)).unwrap();
    assert!(marker.contains("modelscope"));
}
