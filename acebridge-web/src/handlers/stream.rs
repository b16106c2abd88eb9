//! Stream session API: start, manifest, stats, stop.

use std::net::SocketAddr;

use acebridge_core::relay::manifest::playlist_response;
use acebridge_core::session::StreamSession;
use acebridge_core::upstream::{InfoHash, UpstreamError};
use axum::Json;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{Extensions, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub playback_url: String,
    pub infohash: Option<InfoHash>,
}

/// Client address, preferring the first hop of `X-Forwarded-For`.
fn requester(headers: &HeaderMap, extensions: &Extensions) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
}

pub async fn stream_start(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    headers: HeaderMap,
    extensions: Extensions,
) -> Result<Json<StartResponse>, ApiError> {
    let session = state
        .sessions
        .start(&hash, requester(&headers, &extensions))
        .await?;

    Ok(Json(StartResponse {
        playback_url: session.relative_playback_path,
        infohash: session.infohash,
    }))
}

/// Session playlist with upstream origins stripped.
pub async fn stream_manifest(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Response {
    let Some(session) = state.sessions.get(&hash) else {
        return (
            StatusCode::NOT_FOUND,
            "No active session - start stream first",
        )
            .into_response();
    };

    match state
        .proxy
        .session_manifest(&session.upstream_playback_url)
        .await
    {
        Ok(playlist) => playlist_response(playlist),
        Err(UpstreamError::Status { status, .. }) => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
            "Manifest unavailable",
        )
            .into_response(),
        Err(e) => {
            warn!(content_id = %hash, "Manifest fetch failed: {}", e);
            (StatusCode::BAD_GATEWAY, "Manifest fetch failed").into_response()
        }
    }
}

pub async fn stream_stats(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Response, ApiError> {
    match state.sessions.stats(&hash).await {
        Some(stats) => Ok(Json(stats).into_response()),
        None => Err(ApiError::SessionNotFound { content_id: hash }),
    }
}

pub async fn stream_stop(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Json<serde_json::Value> {
    state.sessions.stop(&hash).await;
    Json(json!({ "ok": true }))
}

/// Engine version information, passed through.
pub async fn stream_version(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(Json(state.sessions.engine_version().await?))
}

pub async fn stream_sessions(State(state): State<AppState>) -> Json<Vec<StreamSession>> {
    let mut sessions = state.sessions.sessions();
    sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
    Json(sessions)
}
