//! Mock implementations for testing sessions, relaying and health checks.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::config::UpstreamConfig;
use crate::transcode::StreamProber;
use crate::upstream::{EngineControl, InfoHash, PlaybackGrant, StreamStats, UpstreamError};

/// Calls observed by [`MockEngine`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Start(String),
    Stats(String),
    Stop(String),
}

/// In-process engine with scripted peer counts.
///
/// Stat URLs have the form `mock://stat/<content id>` and command URLs
/// `mock://cmd/<content id>`, so calls can be attributed to content ids.
#[derive(Debug, Default)]
pub struct MockEngine {
    peers: Mutex<HashMap<String, u32>>,
    failing_starts: Mutex<HashSet<String>>,
    calls: Mutex<Vec<EngineCall>>,
    omit_playback_url: bool,
    stats_delay: Option<Duration>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine whose start responses lack a playback URL.
    pub fn new_without_playback_url() -> Self {
        Self {
            omit_playback_url: true,
            ..Self::default()
        }
    }

    /// Engine whose stats take `delay` to arrive.
    pub fn new_with_stats_delay(delay: Duration) -> Self {
        Self {
            stats_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Scripts the peer count reported for `content_id`.
    ///
    /// Content ids without a scripted count have no stats available.
    pub fn set_peers(&self, content_id: &str, peers: u32) {
        self.peers.lock().insert(content_id.to_string(), peers);
    }

    /// Makes starting `content_id` fail as if the engine were unreachable.
    pub fn fail_start(&self, content_id: &str) {
        self.failing_starts.lock().insert(content_id.to_string());
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    pub fn stop_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, EngineCall::Stop(_)))
            .count()
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl EngineControl for MockEngine {
    async fn start_playback(&self, content_id: &str) -> Result<PlaybackGrant, UpstreamError> {
        self.record(EngineCall::Start(content_id.to_string()));

        if self.failing_starts.lock().contains(content_id) {
            return Err(UpstreamError::Unavailable {
                url: "mock://engine".to_string(),
                reason: "connection refused".to_string(),
            });
        }

        if self.omit_playback_url {
            return Err(UpstreamError::ProtocolError {
                message: "no playback URL returned by engine".to_string(),
            });
        }

        Ok(PlaybackGrant {
            playback_url: format!("http://engine:6878/ace/r/{content_id}/playlist.m3u8"),
            stat_url: Some(format!("mock://stat/{content_id}")),
            command_url: Some(format!("mock://cmd/{content_id}")),
            infohash: InfoHash::new(format!("ih-{content_id}")),
        })
    }

    async fn fetch_stats(&self, stat_url: &str) -> Result<StreamStats, UpstreamError> {
        let content_id = stat_url.trim_start_matches("mock://stat/").to_string();
        self.record(EngineCall::Stats(content_id.clone()));

        if let Some(delay) = self.stats_delay {
            tokio::time::sleep(delay).await;
        }

        let peers = self.peers.lock().get(&content_id).copied();
        match peers {
            Some(peers) => Ok(StreamStats {
                peers,
                status: Some("dl".to_string()),
                ..StreamStats::default()
            }),
            None => Err(UpstreamError::Timeout {
                url: stat_url.to_string(),
            }),
        }
    }

    async fn send_stop(&self, command_url: &str) -> Result<(), UpstreamError> {
        let content_id = command_url.trim_start_matches("mock://cmd/").to_string();
        self.record(EngineCall::Stop(content_id));
        Ok(())
    }

    async fn engine_version(&self) -> Result<serde_json::Value, UpstreamError> {
        Ok(serde_json::json!({ "result": { "version": "mock" } }))
    }
}

/// Prober with a fixed verdict that counts invocations.
#[derive(Debug)]
pub struct CountingProber {
    verdict: bool,
    delay: Duration,
    calls: AtomicUsize,
}

impl CountingProber {
    pub fn new(verdict: bool) -> Self {
        Self {
            verdict,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Prober that takes `delay` per probe, widening race windows in tests.
    pub fn with_delay(verdict: bool, delay: Duration) -> Self {
        Self {
            verdict,
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamProber for CountingProber {
    async fn needs_transcode(&self, _segment: &[u8]) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.verdict
    }
}

/// Engine HTTP API served in-process on an ephemeral port.
///
/// Content ids and infohashes with special meaning:
/// - `noplayback`: start response without a playback URL
/// - `rejected`: start response carrying an engine error
/// - `slow`: stats answer after two seconds
/// - `offline`: stats carry an engine error instead of a payload
/// - `missing`: segments answer 404
/// - `untyped`: segments carry no content type
///
/// Segment bodies are `segment:<infohash>:<name>` in lowercase.
pub struct MockEngineServer {
    addr: SocketAddr,
    state: Arc<EngineServerState>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct EngineServerState {
    origin: String,
    segment_fetches: AtomicUsize,
    stops: Mutex<Vec<String>>,
}

impl MockEngineServer {
    /// Binds to `127.0.0.1:0` and starts serving.
    ///
    /// # Errors
    /// - `std::io::Error` - Listener could not be bound
    pub async fn start() -> std::io::Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(EngineServerState {
            origin: format!("http://{addr}"),
            ..EngineServerState::default()
        });

        let app = Router::new()
            .route("/ace/manifest.m3u8", get(mock_start))
            .route("/ace/stat/{id}", get(mock_stats))
            .route("/ace/cmd/{id}", get(mock_command))
            .route("/ace/r/{hash}/{file}", get(mock_playlist))
            .route("/ace/c/{hash}/{segment}", get(mock_segment))
            .route("/webui/api/service", get(mock_version))
            .with_state(state.clone());

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            addr,
            state,
            handle,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Upstream settings pointing at this server with short timeouts.
    pub fn upstream_config(&self) -> UpstreamConfig {
        UpstreamConfig {
            base_url: self.base_url(),
            control_timeout: Duration::from_secs(5),
            stats_timeout: Duration::from_millis(500),
            command_timeout: Duration::from_millis(500),
            ..UpstreamConfig::default()
        }
    }

    /// Segment requests served so far, including error responses.
    pub fn segment_fetches(&self) -> usize {
        self.state.segment_fetches.load(Ordering::SeqCst)
    }

    /// Content ids that received a stop command, in order.
    pub fn stops(&self) -> Vec<String> {
        self.state.stops.lock().clone()
    }

    /// Expected body of segment `name` of `infohash`.
    pub fn segment_body(infohash: &str, name: &str) -> String {
        format!("segment:{infohash}:{name}")
    }
}

impl Drop for MockEngineServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn mock_start(
    State(state): State<Arc<EngineServerState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let id = params.get("id").cloned().unwrap_or_default();
    let origin = &state.origin;

    let body = match id.as_str() {
        "rejected" => json!({ "response": null, "error": "unknown content id" }),
        "noplayback" => json!({
            "response": { "infohash": "ih-noplayback", "stat_url": format!("{origin}/ace/stat/{id}") },
            "error": null
        }),
        _ => json!({
            "response": {
                "infohash": format!("ih-{id}"),
                "playback_url": format!("{origin}/ace/r/ih-{id}/playlist.m3u8"),
                "stat_url": format!("{origin}/ace/stat/{id}"),
                "command_url": format!("{origin}/ace/cmd/{id}"),
                "is_live": 1
            },
            "error": null
        }),
    };

    axum::Json(body).into_response()
}

async fn mock_stats(Path(id): Path<String>) -> Response {
    if id == "slow" {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    if id == "offline" {
        return axum::Json(json!({ "response": null, "error": "stream is not active" }))
            .into_response();
    }
    axum::Json(json!({
        "response": {
            "peers": 7,
            "speed_down": 1200,
            "speed_up": 40,
            "status": "dl",
            "total_progress": 0
        },
        "error": null
    }))
    .into_response()
}

async fn mock_command(
    State(state): State<Arc<EngineServerState>>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if params.get("method").map(String::as_str) == Some("stop") {
        state.stops.lock().push(id);
    }
    axum::Json(json!({ "response": "ok", "error": null })).into_response()
}

async fn mock_playlist(
    State(state): State<Arc<EngineServerState>>,
    Path((hash, _file)): Path<(String, String)>,
) -> Response {
    let origin = &state.origin;
    let playlist = format!(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:5\n\
         #EXTINF:5.0,\n{origin}/ace/c/{hash}/1.ts\n\
         #EXTINF:5.0,\n{origin}/ace/c/{hash}/2.ts\n"
    );
    (
        [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
        playlist,
    )
        .into_response()
}

async fn mock_segment(
    State(state): State<Arc<EngineServerState>>,
    Path((hash, segment)): Path<(String, String)>,
) -> Response {
    state.segment_fetches.fetch_add(1, Ordering::SeqCst);

    let body = MockEngineServer::segment_body(&hash, &segment);
    match hash.as_str() {
        "missing" => (StatusCode::NOT_FOUND, "gone").into_response(),
        "untyped" => Response::new(Body::from(body)),
        _ => ([(header::CONTENT_TYPE, "video/mp2t")], body).into_response(),
    }
}

async fn mock_version() -> Response {
    axum::Json(json!({ "result": { "code": 3020500, "version": "3.2.5" }, "error": null }))
        .into_response()
}
