//! Black-box integration tests for the job pipeline (C3) against a fake
//! coordinator, a fake origin server, and the `mock_ffmpeg` stand-in encoder.
//! Exercises end-to-end scenarios S1 (happy path), S3 (upload 410), and S4
//! (metadata missing part key) from section 8.

mod support;

use std::sync::{Arc, Mutex};

use transcode_worker::capability::CapabilitySet;
use transcode_worker::coordinator::{CoordinatorClient, JobDescriptor, OriginCredentials};
use transcode_worker::origin::OriginClient;
use transcode_worker::pipeline::{self, PipelineContext};
use tokio_util::sync::CancellationToken;

use support::{Request, spawn_fake_server};

fn happy_origin_responder(rating_key: &'static str) -> support::Responder {
    Arc::new(move |req: &Request| {
        if req.method == "GET" && req.path.starts_with(&format!("/library/metadata/{rating_key}")) {
            let body = r#"{"media":[{"part":[{"key":"/library/parts/1/file.mkv"}],"duration_ms":7200000}]}"#;
            (200, body.to_string())
        } else if req.method == "GET" && req.path.starts_with("/library/parts/1/file.mkv") {
            (200, "source-bytes".to_string())
        } else {
            (404, "{}".to_string())
        }
    })
}

fn missing_part_origin_responder() -> support::Responder {
    Arc::new(move |req: &Request| {
        if req.method == "GET" && req.path.starts_with("/library/metadata/") {
            let body = r#"{"media":[{"part":[],"duration_ms":7200000}]}"#;
            (200, body.to_string())
        } else {
            (404, "{}".to_string())
        }
    })
}

#[derive(Default)]
struct CoordinatorLog {
    uploads: Vec<String>,
    errors: Vec<String>,
}

fn recording_coordinator_responder(
    log: Arc<Mutex<CoordinatorLog>>,
    upload_status: u16,
) -> support::Responder {
    Arc::new(move |req: &Request| {
        if req.method == "POST" && req.path.contains("/upload") {
            log.lock().unwrap().uploads.push(req.path.clone());
            (upload_status, "{}".to_string())
        } else if req.method == "POST" && req.path.contains("/error") {
            let body = String::from_utf8_lossy(&req.body).to_string();
            log.lock().unwrap().errors.push(body);
            (200, "{}".to_string())
        } else {
            (200, "{}".to_string())
        }
    })
}

fn test_job(job_id: &str, origin_base_url: String) -> JobDescriptor {
    JobDescriptor {
        job_id: job_id.to_string(),
        media_rating_key: "100".to_string(),
        media_title: "Example".to_string(),
        resolution_label: "720p".to_string(),
        resolution_height: 720,
        max_bitrate: 3000,
        origin: OriginCredentials {
            origin_base_url,
            origin_token: "tok".to_string(),
        },
    }
}

async fn make_ctx(
    coordinator_base_url: String,
    temp_dir: &std::path::Path,
    upload_retries: u32,
) -> PipelineContext {
    let coordinator = CoordinatorClient::new(
        coordinator_base_url,
        "worker-1".to_string(),
        "worker-name".to_string(),
        "secret".to_string(),
    );
    let origin = Arc::new(OriginClient::new(false));
    let capabilities = Arc::new(CapabilitySet {
        encoders: vec!["libx264".to_string()],
        gpu_label: "None".to_string(),
    });
    PipelineContext {
        coordinator,
        origin,
        capabilities,
        ffmpeg_program: Arc::from(support::locate_mock_ffmpeg().to_string_lossy().as_ref()),
        temp_dir: Arc::from(temp_dir),
        upload_retries,
        shutdown: CancellationToken::new(),
    }
}

#[tokio::test]
async fn s1_happy_path_uploads_once_and_cleans_workspace() {
    // SAFETY: tests in this crate don't run this env var concurrently across
    // processes; scoping it to this test's invocation of mock_ffmpeg is enough.
    unsafe {
        std::env::set_var("MOCK_FFMPEG_EXIT_CODE", "0");
    }

    let origin_server = spawn_fake_server(happy_origin_responder("100")).await;
    let log = Arc::new(Mutex::new(CoordinatorLog::default()));
    let coordinator_server =
        spawn_fake_server(recording_coordinator_responder(log.clone(), 200)).await;

    let temp_dir = tempfile::tempdir().unwrap();
    let ctx = make_ctx(coordinator_server.base_url.clone(), temp_dir.path(), 3).await;
    let job = test_job("j1", origin_server.base_url.clone());

    let workspace = transcode_worker::workspace::JobWorkspace::new(temp_dir.path(), "j1");
    pipeline::run_job(job, ctx).await;

    let log = log.lock().unwrap();
    assert_eq!(log.uploads.len(), 1, "expected exactly one upload attempt");
    assert!(log.errors.is_empty(), "no error report expected on success");
    assert!(!workspace.input_path.exists());
    assert!(!workspace.output_path.exists());
}

#[tokio::test]
async fn s3_upload_gone_short_circuits_without_error_report() {
    unsafe {
        std::env::set_var("MOCK_FFMPEG_EXIT_CODE", "0");
    }

    let origin_server = spawn_fake_server(happy_origin_responder("100")).await;
    let log = Arc::new(Mutex::new(CoordinatorLog::default()));
    let coordinator_server =
        spawn_fake_server(recording_coordinator_responder(log.clone(), 410)).await;

    let temp_dir = tempfile::tempdir().unwrap();
    let ctx = make_ctx(coordinator_server.base_url.clone(), temp_dir.path(), 3).await;
    let job = test_job("j1", origin_server.base_url.clone());

    let workspace = transcode_worker::workspace::JobWorkspace::new(temp_dir.path(), "j1");
    pipeline::run_job(job, ctx).await;

    let log = log.lock().unwrap();
    assert_eq!(
        log.uploads.len(),
        1,
        "a 410 must short-circuit retries, not be retried"
    );
    assert!(log.errors.is_empty(), "Gone is success-equivalent, no error report");
    assert!(!workspace.input_path.exists());
    assert!(!workspace.output_path.exists());
}

#[tokio::test]
async fn s4_metadata_missing_part_key_reports_error_without_upload() {
    unsafe {
        std::env::set_var("MOCK_FFMPEG_EXIT_CODE", "0");
    }

    let origin_server = spawn_fake_server(missing_part_origin_responder()).await;
    let log = Arc::new(Mutex::new(CoordinatorLog::default()));
    let coordinator_server =
        spawn_fake_server(recording_coordinator_responder(log.clone(), 200)).await;

    let temp_dir = tempfile::tempdir().unwrap();
    let ctx = make_ctx(coordinator_server.base_url.clone(), temp_dir.path(), 3).await;
    let job = test_job("j1", origin_server.base_url.clone());

    let workspace = transcode_worker::workspace::JobWorkspace::new(temp_dir.path(), "j1");
    pipeline::run_job(job, ctx).await;

    let log = log.lock().unwrap();
    assert!(log.uploads.is_empty(), "no upload without a part key");
    assert_eq!(log.errors.len(), 1);
    assert!(
        log.errors[0].contains("part key"),
        "error cause should mention the missing part key, got: {}",
        log.errors[0]
    );
    assert!(!workspace.input_path.exists());
    assert!(!workspace.output_path.exists());
}

#[tokio::test]
async fn upload_retries_exhaust_after_configured_ceiling() {
    unsafe {
        std::env::set_var("MOCK_FFMPEG_EXIT_CODE", "0");
    }

    let origin_server = spawn_fake_server(happy_origin_responder("100")).await;
    let log = Arc::new(Mutex::new(CoordinatorLog::default()));
    // 500 on every upload attempt: never succeeds, never Gone.
    let coordinator_server =
        spawn_fake_server(recording_coordinator_responder(log.clone(), 500)).await;

    let temp_dir = tempfile::tempdir().unwrap();
    // upload_retries = 1 keeps this test fast: backoff is UPLOAD_RETRY_BASE * attempt.
    let ctx = make_ctx(coordinator_server.base_url.clone(), temp_dir.path(), 1).await;
    let job = test_job("j1", origin_server.base_url.clone());

    pipeline::run_job(job, ctx).await;

    let log = log.lock().unwrap();
    assert_eq!(
        log.uploads.len(),
        1,
        "with upload_retries=1 exactly one attempt should be made before failing"
    );
    assert_eq!(log.errors.len(), 1, "exhausted retries report exactly one error");
}
