//! Integration tests for the webhook receiver.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderValue, Request, Response, StatusCode};
use deploy_hook::job::DeployJob;
use deploy_hook::signature::{SIGNATURE_HEADER, sign_payload};
use deploy_hook::webhook::WebhookData;
use deploy_hook::{AppState, DeployLauncher, DeployLog, DeployRegistry, ReceiverConfig, build_router};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "integration-secret";
const MAIN_PUSH: &str = r#"{"ref":"refs/heads/main","after":"abc123"}"#;

/// Spy launcher: counts calls and runs `sleep` in place of a deploy script.
struct SpyLauncher {
    calls: AtomicUsize,
    sleep_secs: &'static str,
}

impl SpyLauncher {
    fn new(sleep_secs: &'static str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            sleep_secs,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DeployLauncher for SpyLauncher {
    fn launch(&self, _job: &DeployJob, _data: &WebhookData) -> io::Result<Child> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Command::new("sleep")
            .arg(self.sleep_secs)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
    }
}

struct TestApp {
    router: Router,
    launcher: Arc<SpyLauncher>,
    log_path: PathBuf,
    deploys: DeployRegistry,
}

async fn setup_with(config: ReceiverConfig, sleep_secs: &'static str) -> TestApp {
    let dir = std::env::temp_dir().join(format!("deploy_hook-it-{}", Uuid::now_v7()));
    let log_path = dir.join("webhook.log");
    let log = DeployLog::open(&log_path).await.unwrap();
    let launcher = SpyLauncher::new(sleep_secs);
    let deploys = DeployRegistry::new(launcher.clone(), log);
    let config = ReceiverConfig {
        log_file: log_path.clone(),
        ..config
    };
    let router = build_router(Arc::new(AppState::new(config, deploys.clone())));
    TestApp {
        router,
        launcher,
        log_path,
        deploys,
    }
}

fn strict_config() -> ReceiverConfig {
    ReceiverConfig {
        secret: SECRET.to_string(),
        domain: "deploy.example.com".to_string(),
        ..ReceiverConfig::default()
    }
}

async fn setup() -> TestApp {
    setup_with(strict_config(), "0.2").await
}

fn webhook_request(body: &str, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json")
        .header("content-length", body.len().to_string());
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn signed(body: &str) -> Request<Body> {
    webhook_request(body, Some(sign_payload(SECRET, body.as_bytes())))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn text_body(response: Response<Body>) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

async fn wait_until_idle(deploys: &DeployRegistry) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while deploys.is_running().await {
        assert!(tokio::time::Instant::now() < deadline, "deploy never finished");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_health_check() {
    let app = setup().await;

    let response = app.router.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["ok"], true);
    assert_eq!(json["status"], "running");
    assert_eq!(json["domain"], "deploy.example.com");
    assert_eq!(json["deploying"], false);
}

#[tokio::test]
async fn test_plain_liveness_on_any_get() {
    let app = setup().await;

    for uri in ["/", "/anything/else"] {
        let response = app.router.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(text_body(response).await, "Deploy Webhook Receiver - Running");
    }
}

#[tokio::test]
async fn test_signed_push_to_main_deploys_once() {
    let app = setup().await;

    let response = app.router.clone().oneshot(signed(MAIN_PUSH)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "deploying");
    assert!(json["job_id"].as_str().is_some());
    assert_eq!(app.launcher.calls(), 1);

    wait_until_idle(&app.deploys).await;
    app.deploys.log().flush().await.unwrap();
    let log = tokio::fs::read_to_string(&app.log_path).await.unwrap();
    assert!(log.contains("triggering deploy"));
    assert!(log.contains("finished successfully"));
}

#[tokio::test]
async fn test_mismatched_signature_is_rejected() {
    let app = setup().await;

    let forged = sign_payload("not-the-secret", MAIN_PUSH.as_bytes());
    let response = app
        .router
        .clone()
        .oneshot(webhook_request(MAIN_PUSH, Some(forged)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let garbage = app
        .router
        .oneshot(webhook_request(MAIN_PUSH, Some("sha256=nothex".to_string())))
        .await
        .unwrap();
    assert_eq!(garbage.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.launcher.calls(), 0);
}

#[tokio::test]
async fn test_unsigned_push_rejected_in_strict_mode() {
    let app = setup().await;

    let response = app
        .router
        .oneshot(webhook_request(MAIN_PUSH, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.launcher.calls(), 0);
}

#[tokio::test]
async fn test_unsigned_push_allowed_when_configured() {
    let config = ReceiverConfig {
        require_signature: false,
        ..ReceiverConfig::default()
    };
    let app = setup_with(config, "0.2").await;

    let response = app
        .router
        .oneshot(webhook_request(MAIN_PUSH, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "deploying");
    assert_eq!(app.launcher.calls(), 1);
}

#[tokio::test]
async fn test_non_ascii_signature_rejected_when_signatures_optional() {
    let config = ReceiverConfig {
        require_signature: false,
        ..strict_config()
    };
    let app = setup_with(config, "0.2").await;

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("content-length", MAIN_PUSH.len().to_string())
        .header(
            SIGNATURE_HEADER,
            HeaderValue::from_bytes(b"sha256=\xc3\xa9").unwrap(),
        )
        .body(Body::from(MAIN_PUSH))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.launcher.calls(), 0);
}

#[tokio::test]
async fn test_response_does_not_wait_for_deploy() {
    let app = setup_with(strict_config(), "5").await;

    let started = tokio::time::Instant::now();
    let response = app.router.oneshot(signed(MAIN_PUSH)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(app.deploys.is_running().await);
}

#[tokio::test]
async fn test_stalled_request_body_times_out() {
    let config = ReceiverConfig {
        request_timeout_secs: 1,
        ..strict_config()
    };
    let app = setup_with(config, "0.2").await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    // Announce 100 bytes, send 10, then stall.
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"POST / HTTP/1.1\r\nhost: localhost\r\ncontent-length: 100\r\n\r\n{\"ref\":\"r")
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    let mut buf = [0u8; 64];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("no response before the request timeout")
        .unwrap();
    let head = String::from_utf8_lossy(&buf[..n]);
    assert!(head.starts_with("HTTP/1.1 408"), "got {:?}", head);
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(app.launcher.calls(), 0);
}

#[tokio::test]
async fn test_other_branch_is_skipped() {
    let app = setup().await;

    let response = app
        .router
        .oneshot(signed(r#"{"ref":"refs/heads/feature-x"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "skipped");
    assert_eq!(app.launcher.calls(), 0);

    app.deploys.log().flush().await.unwrap();
    let log = tokio::fs::read_to_string(&app.log_path).await.unwrap();
    assert!(log.contains("refs/heads/feature-x skipped"));
}

#[tokio::test]
async fn test_malformed_body_does_not_break_server() {
    let app = setup().await;

    for body in ["{not json", r#"{"after":"abc"}"#] {
        let response = app.router.clone().oneshot(signed(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].as_str().is_some());
    }
    assert_eq!(app.launcher.calls(), 0);

    let health = app.router.oneshot(get("/health")).await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_concurrent_pushes_spawn_one_deploy() {
    let app = setup_with(strict_config(), "2").await;

    let first = app.router.clone().oneshot(signed(MAIN_PUSH)).await.unwrap();
    assert_eq!(json_body(first).await["status"], "deploying");

    let (a, b) = tokio::join!(
        app.router.clone().oneshot(signed(MAIN_PUSH)),
        app.router.clone().oneshot(signed(MAIN_PUSH)),
    );
    for response in [a.unwrap(), b.unwrap()] {
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "already_in_progress");
    }
    assert_eq!(app.launcher.calls(), 1);

    let health = app.router.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(json_body(health).await["deploying"], true);

    wait_until_idle(&app.deploys).await;
    let again = app.router.oneshot(signed(MAIN_PUSH)).await.unwrap();
    assert_eq!(json_body(again).await["status"], "deploying");
    assert_eq!(app.launcher.calls(), 2);
}

#[tokio::test]
async fn test_missing_content_length_is_rejected() {
    let app = setup().await;

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header(SIGNATURE_HEADER, sign_payload(SECRET, MAIN_PUSH.as_bytes()))
        .body(Body::from(MAIN_PUSH))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.launcher.calls(), 0);
}

#[tokio::test]
async fn test_ping_and_other_events_do_not_deploy() {
    let app = setup().await;

    let mut ping = signed(r#"{"zen":"Keep it logically awesome."}"#);
    ping.headers_mut()
        .insert("X-GitHub-Event", "ping".parse().unwrap());
    let response = app.router.clone().oneshot(ping).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "pong");

    let mut issues = signed(MAIN_PUSH);
    issues
        .headers_mut()
        .insert("X-GitHub-Event", "issues".parse().unwrap());
    let response = app.router.oneshot(issues).await.unwrap();
    assert_eq!(json_body(response).await["status"], "ignored");
    assert_eq!(app.launcher.calls(), 0);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let config = ReceiverConfig {
        max_body_bytes: 64,
        ..strict_config()
    };
    let app = setup_with(config, "0.2").await;

    let body = format!(r#"{{"ref":"refs/heads/main","pad":"{}"}}"#, "x".repeat(128));
    let response = app.router.oneshot(signed(&body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(app.launcher.calls(), 0);
}

#[tokio::test]
async fn test_status_reports_current_and_last_deploy() {
    let app = setup_with(strict_config(), "1").await;

    let response = app.router.clone().oneshot(signed(MAIN_PUSH)).await.unwrap();
    let job_id = json_body(response).await["job_id"]
        .as_str()
        .unwrap()
        .to_string();

    let running = json_body(app.router.clone().oneshot(get("/status")).await.unwrap()).await;
    assert_eq!(running["current"]["id"], job_id.as_str());
    assert_eq!(running["current"]["status"], "running");
    assert_eq!(running["current"]["commit_sha"], "abc123");

    wait_until_idle(&app.deploys).await;
    let finished = json_body(app.router.oneshot(get("/status")).await.unwrap()).await;
    assert!(finished["current"].is_null());
    assert_eq!(finished["last"]["id"], job_id.as_str());
    assert_eq!(finished["last"]["exit_code"], 0);
    assert_eq!(finished["server"]["allowed_ref"], "refs/heads/main");
}

#[tokio::test]
async fn test_custom_webhook_path() {
    let config = ReceiverConfig {
        webhook_path: "/hooks/deploy".to_string(),
        ..strict_config()
    };
    let app = setup_with(config, "0.2").await;

    let mut request = signed(MAIN_PUSH);
    *request.uri_mut() = "/hooks/deploy".parse().unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(json_body(response).await["status"], "deploying");

    let wrong_path = app.router.oneshot(signed(MAIN_PUSH)).await.unwrap();
    assert_eq!(wrong_path.status(), StatusCode::NOT_FOUND);
}
