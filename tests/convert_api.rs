//! HTTP integration tests for the conversion endpoint.
//!
//! Most tests substitute an in-process engine; the unix-only tests at the end
//! drive the real `FfmpegEngine` against shell scripts standing in for ffmpeg.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use ticker_backend::app::create_app;
use ticker_backend::common::scratch::ScratchDir;
use ticker_backend::config::settings::AppConfig;
use ticker_backend::infrastructure::engine::{
    EngineError, EngineEvent, JobHandle, TranscodeEngine, TranscodeJob,
};
use ticker_backend::state::AppState;

const BOUNDARY: &str = "ticker-test-boundary";

#[derive(Clone, Copy, PartialEq)]
enum Behaviour {
    /// Copy input to output, like a lossless remux.
    Copy,
    Fail,
    Hang,
}

struct FakeEngine {
    behaviour: Behaviour,
    available: bool,
    launches: AtomicUsize,
    outputs: Mutex<Vec<PathBuf>>,
    stopped: Arc<AtomicBool>,
}

impl FakeEngine {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            available: true,
            launches: AtomicUsize::new(0),
            outputs: Mutex::new(Vec::new()),
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            behaviour: Behaviour::Copy,
            available: false,
            launches: AtomicUsize::new(0),
            outputs: Mutex::new(Vec::new()),
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl TranscodeEngine for FakeEngine {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn resolve(&self) -> Option<PathBuf> {
        self.available.then(|| PathBuf::from("/usr/bin/ffmpeg"))
    }

    async fn version(&self) -> Option<String> {
        Some("ffmpeg version 6.1-test".to_string())
    }

    fn launch(&self, job: &TranscodeJob) -> Result<JobHandle, EngineError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.outputs.lock().unwrap().push(job.output.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let behaviour = self.behaviour;
        let (input, output) = (job.input.clone(), job.output.clone());
        let stopped = self.stopped.clone();

        let driver = tokio::spawn(async move {
            let _ = tx.send(EngineEvent::Started {
                command_line: "ffmpeg -i in out".to_string(),
            });
            match behaviour {
                Behaviour::Copy => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    tokio::fs::copy(&input, &output).await.unwrap();
                    let _ = tx.send(EngineEvent::Completed);
                }
                Behaviour::Fail => {
                    let _ = tx.send(EngineEvent::Failed {
                        message: "Invalid data found when processing input".to_string(),
                    });
                }
                Behaviour::Hang => {
                    tokio::fs::write(&output, b"half a file").await.unwrap();
                    token.cancelled().await;
                    stopped.store(true, Ordering::SeqCst);
                }
            }
        });

        Ok(JobHandle::new(rx, cancel, driver))
    }
}

struct TestApp {
    router: Router,
    _tmp: TempDir,
    scratch: PathBuf,
}

async fn test_app(engine: Arc<dyn TranscodeEngine>, tweak: impl FnOnce(&mut AppConfig)) -> TestApp {
    let tmp = tempfile::tempdir().unwrap();
    let scratch_root = tmp.path().join("uploads");

    let mut config = AppConfig::default();
    config.upload_dir = scratch_root.clone();
    config.transcode.timeout = Duration::from_secs(5);
    config.transcode.kill_grace = Duration::from_millis(500);
    tweak(&mut config);

    let scratch = ScratchDir::ensure(&scratch_root).await.unwrap();
    let state = AppState::new(config, engine, scratch);

    TestApp {
        router: create_app(state),
        _tmp: tmp,
        scratch: scratch_root,
    }
}

fn multipart_request(field: &str, filename: &str, content_type: &str, data: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n").as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::post("/convert")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn webm_upload(data: &[u8]) -> Request<Body> {
    multipart_request("video", "ticker.webm", "video/webm", data)
}

async fn json_body(body: Body) -> serde_json::Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn scratch_entries(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}

#[tokio::test]
async fn root_describes_the_service() {
    let app = test_app(FakeEngine::new(Behaviour::Copy), |_| {}).await;

    let response = app
        .router
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response.into_body()).await;
    assert!(json["message"].as_str().unwrap().contains("/convert"));
}

#[tokio::test]
async fn health_reports_engine_status() {
    let app = test_app(FakeEngine::new(Behaviour::Copy), |_| {}).await;

    let response = app
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response.into_body()).await;
    assert_eq!(json["status"], "OK");
    assert_eq!(json["ffmpeg"], true);
    assert_eq!(json["ffmpegPath"], "/usr/bin/ffmpeg");
    assert_eq!(json["ffmpegVersion"], "ffmpeg version 6.1-test");
}

#[tokio::test]
async fn health_without_engine_is_still_ok() {
    let app = test_app(FakeEngine::unavailable(), |_| {}).await;

    let response = app
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response.into_body()).await;
    assert_eq!(json["ffmpeg"], false);
    assert!(json["ffmpegPath"].is_null());
}

#[tokio::test]
async fn successful_conversion_streams_attachment_and_cleans_up() {
    let engine = FakeEngine::new(Behaviour::Copy);
    let app = test_app(engine.clone(), |c| c.download_filename = "ticker.mp4".to_string()).await;

    let response = app.router.oneshot(webm_upload(b"webm payload")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"ticker.mp4\""
    );
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "12");

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"webm payload");

    assert_eq!(engine.launches.load(Ordering::SeqCst), 1);
    assert!(scratch_entries(&app.scratch).is_empty());
}

#[tokio::test]
async fn default_download_name_is_sent_as_extended_parameter() {
    let app = test_app(FakeEngine::new(Behaviour::Copy), |_| {}).await;

    let response = app.router.oneshot(webm_upload(b"clip")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
    let encoded = disposition.rsplit("UTF-8''").next().unwrap();
    assert_eq!(urlencoding::decode(encoded).unwrap(), "бегущая_строка.mp4");
}

#[tokio::test]
async fn dropping_the_response_still_cleans_up() {
    let app = test_app(FakeEngine::new(Behaviour::Copy), |_| {}).await;

    let response = app.router.oneshot(webm_upload(b"never read")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    drop(response);

    assert!(scratch_entries(&app.scratch).is_empty());
}

#[tokio::test]
async fn missing_file_field_is_rejected_without_side_effects() {
    let engine = FakeEngine::new(Behaviour::Copy);
    let app = test_app(engine.clone(), |_| {}).await;

    let response = app
        .router
        .oneshot(multipart_request("attachment", "a.webm", "video/webm", b"data"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response.into_body()).await;
    assert_eq!(json["kind"], "no_file_provided");
    assert!(json["error"].is_string());
    assert_eq!(engine.launches.load(Ordering::SeqCst), 0);
    assert!(scratch_entries(&app.scratch).is_empty());
}

#[tokio::test]
async fn non_multipart_request_is_a_missing_file() {
    let app = test_app(FakeEngine::new(Behaviour::Copy), |_| {}).await;

    let response = app
        .router
        .oneshot(
            Request::post("/convert")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response.into_body()).await;
    assert_eq!(json["kind"], "no_file_provided");
}

#[tokio::test]
async fn empty_upload_is_rejected_and_removed() {
    let engine = FakeEngine::new(Behaviour::Copy);
    let app = test_app(engine.clone(), |_| {}).await;

    let response = app.router.oneshot(webm_upload(b"")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response.into_body()).await;
    assert_eq!(json["kind"], "no_file_provided");
    assert_eq!(json["details"], "uploaded file is empty");
    assert_eq!(engine.launches.load(Ordering::SeqCst), 0);
    assert!(scratch_entries(&app.scratch).is_empty());
}

#[tokio::test]
async fn non_video_upload_is_rejected() {
    let app = test_app(FakeEngine::new(Behaviour::Copy), |_| {}).await;

    let response = app
        .router
        .oneshot(multipart_request("video", "cat.png", "image/png", b"png"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let json = json_body(response.into_body()).await;
    assert_eq!(json["kind"], "unsupported_media_type");
    assert!(scratch_entries(&app.scratch).is_empty());
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let engine = FakeEngine::new(Behaviour::Copy);
    let app = test_app(engine.clone(), |c| c.max_upload_bytes = 64).await;

    let response = app.router.oneshot(webm_upload(&[7u8; 4096])).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let json = json_body(response.into_body()).await;
    assert_eq!(json["kind"], "upload_too_large");
    assert_eq!(engine.launches.load(Ordering::SeqCst), 0);
    assert!(scratch_entries(&app.scratch).is_empty());
}

#[tokio::test]
async fn unavailable_engine_fails_fast() {
    let engine = FakeEngine::unavailable();
    let app = test_app(engine.clone(), |_| {}).await;

    let response = app.router.oneshot(webm_upload(b"webm")).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_body(response.into_body()).await;
    assert_eq!(json["kind"], "engine_unavailable");
    assert_eq!(engine.launches.load(Ordering::SeqCst), 0);
    assert!(scratch_entries(&app.scratch).is_empty());
}

#[tokio::test]
async fn engine_failure_is_reported_with_details() {
    let app = test_app(FakeEngine::new(Behaviour::Fail), |_| {}).await;

    let response = app.router.oneshot(webm_upload(b"webm")).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_body(response.into_body()).await;
    assert_eq!(json["kind"], "engine_error");
    assert!(json["details"].as_str().unwrap().contains("Invalid data"));
    assert!(scratch_entries(&app.scratch).is_empty());
}

#[tokio::test]
async fn hung_engine_times_out_and_is_stopped() {
    let engine = FakeEngine::new(Behaviour::Hang);
    let app = test_app(engine.clone(), |c| c.transcode.timeout = Duration::from_millis(200)).await;

    let response = app.router.oneshot(webm_upload(b"webm")).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_body(response.into_body()).await;
    assert_eq!(json["kind"], "timeout");
    assert!(engine.stopped.load(Ordering::SeqCst));
    assert!(scratch_entries(&app.scratch).is_empty());
}

#[tokio::test]
async fn concurrent_conversions_stay_independent() {
    let engine = FakeEngine::new(Behaviour::Copy);
    let app = test_app(engine.clone(), |_| {}).await;

    let requests = (0..4).map(|i| {
        let router = app.router.clone();
        async move {
            let payload = format!("clip number {i}").into_bytes();
            let response = router.oneshot(webm_upload(&payload)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            (payload, bytes)
        }
    });

    for (sent, received) in futures_util::future::join_all(requests).await {
        assert_eq!(&received[..], &sent[..]);
    }

    let outputs = engine.outputs.lock().unwrap().clone();
    let distinct: std::collections::HashSet<_> = outputs.iter().collect();
    assert_eq!(outputs.len(), 4);
    assert_eq!(distinct.len(), 4);
    assert!(scratch_entries(&app.scratch).is_empty());
}

#[tokio::test]
async fn cors_allows_the_configured_origin() {
    let app = test_app(FakeEngine::new(Behaviour::Copy), |c| {
        c.allowed_origin = "https://frontend.example".to_string()
    })
    .await;

    let response = app
        .router
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/convert")
                .header(header::ORIGIN, "https://frontend.example")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://frontend.example"
    );
}

#[cfg(unix)]
mod with_script_engine {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use ticker_backend::infrastructure::engine::{AudioMode, FfmpegEngine};

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Copies the `-i` argument to the last argument.
    const COPY_SCRIPT: &str = r#"in=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-i" ]; then in="$arg"; fi
  prev="$arg"
  out="$arg"
done
echo "progress=end"
cp "$in" "$out""#;

    #[tokio::test]
    async fn script_engine_round_trip() {
        let bin_dir = tempfile::tempdir().unwrap();
        let script = write_script(bin_dir.path(), COPY_SCRIPT);
        let engine = Arc::new(FfmpegEngine::new(script.to_string_lossy()));
        let app = test_app(engine, |_| {}).await;

        let response = app.router.oneshot(webm_upload(b"recorded canvas")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"recorded canvas");
        assert!(scratch_entries(&app.scratch).is_empty());
    }

    async fn recorded_arguments(audio_mode: AudioMode) -> String {
        let bin_dir = tempfile::tempdir().unwrap();
        let args_file = bin_dir.path().join("args");
        let body = format!("echo \"$*\" > '{}'\n{COPY_SCRIPT}", args_file.display());
        let script = write_script(bin_dir.path(), &body);
        let engine = Arc::new(FfmpegEngine::new(script.to_string_lossy()));
        let app = test_app(engine, |c| c.transcode.audio_mode = audio_mode).await;

        let response = app.router.oneshot(webm_upload(b"recorded with audio")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"recorded with audio");

        std::fs::read_to_string(args_file).unwrap()
    }

    #[tokio::test]
    async fn preserve_audio_mode_reaches_the_engine() {
        let args = recorded_arguments(AudioMode::Preserve).await;
        assert!(args.contains("-map 0:v:0 -map 0:a? -c:a aac"), "{args}");
        assert!(!args.contains(" -an "), "{args}");
    }

    #[tokio::test]
    async fn strip_audio_mode_reaches_the_engine() {
        let args = recorded_arguments(AudioMode::Strip).await;
        assert!(args.contains(" -an "), "{args}");
        assert!(!args.contains("-c:a"), "{args}");
    }

    #[tokio::test]
    async fn script_engine_timeout_kills_the_process() {
        let bin_dir = tempfile::tempdir().unwrap();
        let script = write_script(bin_dir.path(), "exec sleep 30");
        let engine = Arc::new(FfmpegEngine::new(script.to_string_lossy()));
        let app = test_app(engine, |c| c.transcode.timeout = Duration::from_secs(1)).await;

        let started = std::time::Instant::now();
        let response = app.router.oneshot(webm_upload(b"webm")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(started.elapsed() < Duration::from_secs(10));
        let json = json_body(response.into_body()).await;
        assert_eq!(json["kind"], "timeout");
        assert!(scratch_entries(&app.scratch).is_empty());
    }

    #[tokio::test]
    async fn missing_binary_is_engine_unavailable() {
        let engine = Arc::new(FfmpegEngine::new("/nonexistent/bin/ffmpeg"));
        let app = test_app(engine, |_| {}).await;

        let response = app.router.oneshot(webm_upload(b"webm")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = json_body(response.into_body()).await;
        assert_eq!(json["kind"], "engine_unavailable");
    }
}
