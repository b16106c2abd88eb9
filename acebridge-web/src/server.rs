//! Application state, routing and the listener loop.

use std::net::SocketAddr;
use std::sync::Arc;

use acebridge_core::config::BridgeConfig;
use acebridge_core::health::MemoryLinkStore;
use acebridge_core::relay::{ControlProxy, SegmentRelay};
use acebridge_core::session::SessionManager;
use acebridge_core::transcode::{
    DecisionCache, EncoderMode, EncoderProfile, FfprobeProber, StreamProber, TranscodingPipe,
    detect_encoder_mode,
};
use acebridge_core::upstream::UpstreamClient;
use acebridge_core::{BridgeError, HealthChecker, LinkStore};
use axum::Router;
use axum::routing::{any, get, post};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::handlers::{
    api_status, check_link, check_links, check_status, playback_proxy, start_check, stream_manifest,
    stream_sessions, stream_start, stream_stats, stream_stop, stream_version,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BridgeConfig>,
    pub sessions: Arc<SessionManager>,
    pub relay: SegmentRelay,
    pub proxy: ControlProxy,
    pub checker: HealthChecker,
    pub links: Arc<MemoryLinkStore>,
    pub encoder_mode: EncoderMode,
}

impl AppState {
    /// Wires components around the given prober and encoder.
    ///
    /// # Errors
    /// - `BridgeError::Configuration` - Upstream URL rewrite patterns invalid
    pub fn new(
        config: BridgeConfig,
        links: Arc<MemoryLinkStore>,
        prober: Arc<dyn StreamProber>,
        encoder: EncoderProfile,
        encoder_mode: EncoderMode,
    ) -> Result<Self, BridgeError> {
        let upstream = UpstreamClient::new(&config.upstream);
        let sessions = Arc::new(SessionManager::new(
            Arc::new(upstream.clone()),
            format!(
                "{}/manifest",
                config.server.stream_api_prefix.trim_end_matches('/')
            ),
            config.upstream.stats_timeout,
        ));

        let relay = SegmentRelay::new(
            upstream.clone(),
            Arc::new(DecisionCache::new(config.transcode.verdict_ttl)),
            prober,
            TranscodingPipe::new(encoder),
        );
        let proxy = ControlProxy::new(upstream)?;
        let checker = HealthChecker::new(sessions.clone(), config.health.clone());

        Ok(Self {
            config: Arc::new(config),
            sessions,
            relay,
            proxy,
            checker,
            links,
            encoder_mode,
        })
    }

    /// Production wiring: ffprobe inspection and a startup capability probe.
    ///
    /// # Errors
    /// - `BridgeError::Configuration` - Upstream URL rewrite patterns invalid
    pub async fn from_config(
        config: BridgeConfig,
        links: Arc<MemoryLinkStore>,
    ) -> Result<Self, BridgeError> {
        let encoder_mode = detect_encoder_mode(&config.transcode).await;
        let encoder = EncoderProfile::for_mode(config.transcode.ffmpeg_path.clone(), &encoder_mode);
        let prober = Arc::new(FfprobeProber::from_config(&config.transcode));

        Self::new(config, links, prober, encoder, encoder_mode)
    }

    pub fn link_store(&self) -> Arc<dyn LinkStore> {
        self.links.clone()
    }
}

/// Builds the full route table.
pub fn router(state: AppState) -> Router {
    let prefix = state.config.server.stream_api_prefix.trim_end_matches('/');
    let playback = format!(
        "/{}/{{*path}}",
        state.config.upstream.proxy_prefix.trim_matches('/')
    );

    Router::new()
        // Playback surface mirroring the engine
        .route(&playback, any(playback_proxy))
        // Stream session API
        .route(&format!("{prefix}/start/{{hash}}"), post(stream_start))
        .route(&format!("{prefix}/manifest/{{hash}}"), get(stream_manifest))
        .route(&format!("{prefix}/stats/{{hash}}"), get(stream_stats))
        .route(&format!("{prefix}/stop/{{hash}}"), post(stream_stop))
        .route(&format!("{prefix}/version"), get(stream_version))
        .route(&format!("{prefix}/sessions"), get(stream_sessions))
        // Link health checks
        .route("/api/check", post(start_check))
        .route("/api/check/status", get(check_status))
        .route("/api/check/links", get(check_links))
        .route("/api/check/{hash}", post(check_link))
        .route("/api/status", get(api_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Runs the server until the listener fails.
///
/// # Errors
/// - `BridgeError::Io` - Listener could not be bound or serving failed
/// - `BridgeError::Configuration` - Upstream URL rewrite patterns invalid
pub async fn run_server(config: BridgeConfig, links: MemoryLinkStore) -> Result<(), BridgeError> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let sweep_interval = config.health.sweep_interval;

    let state = AppState::from_config(config, Arc::new(links)).await?;
    info!("Encoder mode: {}", state.encoder_mode);
    info!("Upstream engine: {}", state.config.upstream.base_url);

    if let Some(interval) = sweep_interval {
        info!("Scheduled link sweeps every {:?}", interval);
        state
            .checker
            .spawn_periodic(state.link_store(), interval);
    }

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Acebridge listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
