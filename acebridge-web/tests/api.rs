//! Router-level tests against an in-process engine.

use std::sync::Arc;
use std::time::Duration;

use acebridge_core::config::{BridgeConfig, UpstreamConfig};
use acebridge_core::health::{LinkRef, MemoryLinkStore};
use acebridge_core::test_mocks::{CountingProber, MockEngineServer};
use acebridge_core::transcode::{EncoderMode, EncoderProfile};
use acebridge_web::{AppState, router};
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Response;
use tower::ServiceExt;

/// Router backed by a mock engine, a scripted prober and an uppercasing
/// stand-in encoder.
struct ApiFixture {
    server: MockEngineServer,
    prober: Arc<CountingProber>,
    app: Router,
}

impl ApiFixture {
    async fn new(needs_transcode: bool) -> Self {
        Self::with_links(needs_transcode, Vec::new()).await
    }

    async fn with_links(needs_transcode: bool, links: Vec<LinkRef>) -> Self {
        let server = MockEngineServer::start().await.unwrap();
        let config = BridgeConfig {
            upstream: server.upstream_config(),
            ..BridgeConfig::for_testing()
        };
        let prober = Arc::new(CountingProber::with_delay(
            needs_transcode,
            Duration::from_millis(50),
        ));

        let state = AppState::new(
            config,
            Arc::new(MemoryLinkStore::new(links)),
            prober.clone(),
            EncoderProfile::custom("tr", vec!["a-z".to_string(), "A-Z".to_string()]),
            EncoderMode::Software,
        )
        .unwrap();

        Self {
            server,
            prober,
            app: router(state),
        }
    }

    async fn send(&self, method: Method, uri: &str) -> Response {
        self.app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn get(&self, uri: &str) -> Response {
        self.send(Method::GET, uri).await
    }

    async fn post(&self, uri: &str) -> Response {
        self.send(Method::POST, uri).await
    }
}

async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

#[tokio::test]
async fn test_stream_session_lifecycle() {
    let fixture = ApiFixture::new(false).await;

    let started = fixture.post("/api/stream/start/abc").await;
    assert_eq!(started.status(), StatusCode::OK);
    let body = body_json(started).await;
    assert_eq!(body["playbackUrl"], "/api/stream/manifest/abc");
    assert_eq!(body["infohash"], "ih-abc");

    let manifest = fixture.get("/api/stream/manifest/abc").await;
    assert_eq!(manifest.status(), StatusCode::OK);
    assert_eq!(
        manifest.headers()[header::CONTENT_TYPE],
        "application/vnd.apple.mpegurl"
    );
    assert_eq!(manifest.headers()[header::CACHE_CONTROL], "no-cache, no-store");
    let playlist = body_string(manifest).await;
    assert!(playlist.contains("\n/ace/c/ih-abc/1.ts\n"));
    assert!(!playlist.contains("http://"));

    let stats = fixture.get("/api/stream/stats/abc").await;
    assert_eq!(stats.status(), StatusCode::OK);
    assert_eq!(body_json(stats).await["peers"], 7);

    let stopped = fixture.post("/api/stream/stop/abc").await;
    assert_eq!(body_json(stopped).await["ok"], true);
    assert_eq!(fixture.server.stops(), vec!["abc".to_string()]);

    let after = fixture.get("/api/stream/manifest/abc").await;
    assert_eq!(after.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stats_without_session_is_not_found() {
    let fixture = ApiFixture::new(false).await;

    let response = fixture.get("/api/stream/stats/never-started").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(body_json(response).await["error"].is_string());
}

#[tokio::test]
async fn test_stop_unknown_session_is_ok() {
    let fixture = ApiFixture::new(false).await;

    let response = fixture.post("/api/stream/stop/never-started").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(fixture.server.stops().is_empty());
}

#[tokio::test]
async fn test_start_failures_are_bad_gateway() {
    let fixture = ApiFixture::new(false).await;

    let missing_url = fixture.post("/api/stream/start/noplayback").await;
    assert_eq!(missing_url.status(), StatusCode::BAD_GATEWAY);

    let rejected = fixture.post("/api/stream/start/rejected").await;
    assert_eq!(rejected.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(rejected).await;
    assert!(body["error"].as_str().unwrap().contains("unknown content id"));
}

#[tokio::test]
async fn test_engine_version() {
    let fixture = ApiFixture::new(false).await;

    let response = fixture.get("/api/stream/version").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["result"]["version"], "3.2.5");
}

#[tokio::test]
async fn test_passthrough_segments() {
    let fixture = ApiFixture::new(false).await;

    for n in 1..=3 {
        let response = fixture.get(&format!("/ace/c/ih-abc/{n}.ts")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp2t");
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            body_string(response).await,
            MockEngineServer::segment_body("ih-abc", &format!("{n}.ts"))
        );
    }
    assert_eq!(fixture.prober.calls(), 1);
}

#[tokio::test]
async fn test_transcoded_segments() {
    let fixture = ApiFixture::new(true).await;

    for n in 1..=2 {
        let response = fixture.get(&format!("/ace/c/ih-abc/{n}.ts")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp2t");
        assert_eq!(
            body_string(response).await,
            MockEngineServer::segment_body("ih-abc", &format!("{n}.ts")).to_uppercase()
        );
    }
    assert_eq!(fixture.prober.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_first_segments_probe_once() {
    let fixture = Arc::new(ApiFixture::new(false).await);

    let mut handles = Vec::new();
    for n in 0..8 {
        let fixture = fixture.clone();
        handles.push(tokio::spawn(async move {
            fixture.get(&format!("/ace/c/ih-burst/{n}.ts")).await.status()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }

    assert_eq!(fixture.prober.calls(), 1);
}

#[tokio::test]
async fn test_proxy_rewrites_start_json() {
    let fixture = ApiFixture::new(false).await;

    let response = fixture.get("/ace/manifest.m3u8?id=abc&format=json").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");

    let body = body_json(response).await;
    assert_eq!(body["response"]["playback_url"], "/ace/r/ih-abc/playlist.m3u8");
    assert_eq!(body["response"]["command_url"], "/ace/cmd/abc");
}

#[tokio::test]
async fn test_unreachable_engine_is_bad_gateway() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = BridgeConfig {
        upstream: UpstreamConfig {
            base_url: format!("http://127.0.0.1:{port}"),
            control_timeout: Duration::from_secs(2),
            ..UpstreamConfig::default()
        },
        ..BridgeConfig::for_testing()
    };
    let state = AppState::new(
        config,
        Arc::new(MemoryLinkStore::default()),
        Arc::new(CountingProber::new(false)),
        EncoderProfile::custom("cat", Vec::new()),
        EncoderMode::Software,
    )
    .unwrap();
    let app = router(state);

    for (method, uri) in [
        (Method::GET, "/ace/c/ih-abc/1.ts"),
        (Method::GET, "/ace/r/ih-abc/playlist.m3u8"),
        (Method::POST, "/api/stream/start/abc"),
        (Method::GET, "/api/stream/version"),
    ] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY, "{uri}");
    }
}

#[tokio::test]
async fn test_single_link_check_records_result() {
    let fixture = ApiFixture::with_links(
        false,
        vec![LinkRef {
            hash: "abc".to_string(),
            label: "News".to_string(),
        }],
    )
    .await;

    let response = fixture.post("/api/check/abc").await;
    assert_eq!(response.status(), StatusCode::OK);
    let result = body_json(response).await;
    assert_eq!(result["status"], "ok");
    assert_eq!(result["peerCount"], 7);

    let links = body_json(fixture.get("/api/check/links").await).await;
    assert_eq!(links[0]["label"], "News");
    assert_eq!(links[0]["status"], "ok");
    assert_eq!(fixture.server.stops(), vec!["abc".to_string()]);
}

#[tokio::test]
async fn test_sweep_gate_over_http() {
    // Stats for "slow" outlast the stats budget, keeping the sweep busy
    let fixture = ApiFixture::with_links(
        false,
        vec![LinkRef {
            hash: "slow".to_string(),
            label: "Slow".to_string(),
        }],
    )
    .await;

    let first = body_json(fixture.post("/api/check").await).await;
    assert_eq!(first["started"], true);

    let second = body_json(fixture.post("/api/check").await).await;
    assert_eq!(second["started"], false);
    assert_eq!(second["running"], true);

    let refused = fixture.post("/api/check/other").await;
    assert_eq!(refused.status(), StatusCode::CONFLICT);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = body_json(fixture.get("/api/check/status").await).await;
        if status["running"] == false {
            assert_eq!(status["total"], 0);
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "sweep never finished");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let links = body_json(fixture.get("/api/check/links").await).await;
    assert_eq!(links[0]["status"], "fail");
}

#[tokio::test]
async fn test_runtime_status() {
    let fixture = ApiFixture::new(false).await;
    fixture.post("/api/stream/start/abc").await;
    fixture.get("/ace/c/ih-abc/1.ts").await;

    let status = body_json(fixture.get("/api/status").await).await;
    assert_eq!(status["activeSessions"], 1);
    assert_eq!(status["cachedVerdicts"], 1);
    assert_eq!(status["sweep"]["running"], false);
}
