//! Catch-all proxy for the engine's playback paths.

use acebridge_core::relay::{ProxyRequest, is_segment_path};
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, Method, header};
use axum::response::Response;

use crate::server::AppState;

/// Routes segments to the relay and everything else to the control proxy.
pub async fn playback_proxy(
    State(state): State<AppState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    method: Method,
    headers: HeaderMap,
) -> Response {
    if is_segment_path(&path) {
        return state.relay.relay(&path, query.as_deref()).await;
    }

    let header_text = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    state
        .proxy
        .forward(ProxyRequest {
            method,
            rest_path: path,
            query,
            accept: header_text(header::ACCEPT),
            user_agent: header_text(header::USER_AGENT),
        })
        .await
}
