//! Playlist and control response forwarding with URL rewriting.

use std::sync::Arc;

use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use regex::Regex;
use tracing::{debug, warn};

use crate::config::UpstreamConfig;
use crate::upstream::client::ForwardRequest;
use crate::upstream::{UpstreamClient, UpstreamError};

/// MIME type for HLS playlists.
pub const MPEGURL: &str = "application/vnd.apple.mpegurl";

const NO_STORE: &str = "no-cache, no-store";

/// Rewrites absolute upstream URLs inside text bodies.
#[derive(Debug, Clone)]
pub struct ManifestRewriter {
    base_url: String,
    prefix: String,
    proxy_url: Regex,
    origin: Regex,
}

impl ManifestRewriter {
    /// Builds patterns matching the configured engine's URLs.
    ///
    /// With an explicit port in the base URL any host on that port matches,
    /// since the engine reports URLs under whatever hostname it sees itself
    /// as. Without one, the configured host is matched literally.
    ///
    /// # Errors
    /// - `regex::Error` - Pattern could not be compiled
    pub fn new(config: &UpstreamConfig) -> Result<Self, regex::Error> {
        let parsed = url::Url::parse(&config.base_url).ok();
        let host = match (
            parsed.as_ref().and_then(|u| u.port()),
            parsed.as_ref().and_then(|u| u.host_str()),
        ) {
            (Some(port), _) => format!(r#"[^/\s"']+:{port}"#),
            (None, Some(host)) => regex::escape(host),
            (None, None) => r#"[^/\s"']+"#.to_string(),
        };
        let prefix = config.proxy_prefix.trim_matches('/').to_string();

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            proxy_url: Regex::new(&format!(
                r"https?://{host}/{}/",
                regex::escape(&prefix)
            ))?,
            origin: Regex::new(&format!(r"https?://{host}"))?,
            prefix,
        })
    }

    /// Maps `http://<engine>/<prefix>/...` to `/<prefix>/...`.
    pub fn rewrite_proxy_body(&self, body: &str) -> String {
        let replacement = format!("/{}/", self.prefix);
        self.proxy_url
            .replace_all(body, regex::NoExpand(&replacement))
            .into_owned()
    }

    /// Removes the engine's scheme, host and port, leaving absolute paths.
    pub fn strip_upstream_origin(&self, body: &str) -> String {
        let body = body.replace(&self.base_url, "");
        self.origin.replace_all(&body, "").into_owned()
    }
}

/// Non-segment request under the playback prefix.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// Path below the prefix, e.g. `manifest.m3u8`
    pub rest_path: String,
    /// Raw query string without `?`
    pub query: Option<String>,
    pub accept: Option<String>,
    pub user_agent: Option<String>,
}

impl ProxyRequest {
    fn wants_json(&self, content_type: &str) -> bool {
        content_type.contains("application/json")
            || self
                .query
                .as_deref()
                .is_some_and(|q| q.split('&').any(|pair| pair == "format=json"))
    }

    fn is_playlist(&self, content_type: &str) -> bool {
        content_type.contains("mpegurl") || self.rest_path.ends_with(".m3u8")
    }
}

/// Forwards playlists and control calls to the engine.
#[derive(Debug, Clone)]
pub struct ControlProxy {
    upstream: UpstreamClient,
    rewriter: Arc<ManifestRewriter>,
}

impl ControlProxy {
    /// # Errors
    /// - `regex::Error` - Rewrite patterns for the upstream could not be built
    pub fn new(upstream: UpstreamClient) -> Result<Self, regex::Error> {
        let rewriter = ManifestRewriter::new(upstream.config())?;
        Ok(Self {
            upstream,
            rewriter: Arc::new(rewriter),
        })
    }

    pub fn rewriter(&self) -> &ManifestRewriter {
        &self.rewriter
    }

    /// Forwards `request` and rewrites JSON and playlist bodies.
    ///
    /// Other content passes through as bytes. Upstream error statuses are
    /// mirrored; an unreachable engine yields 502.
    pub async fn forward(&self, request: ProxyRequest) -> Response {
        let target = self
            .upstream
            .playback_target(&request.rest_path, request.query.as_deref());

        let response = match self
            .upstream
            .forward(ForwardRequest {
                method: request.method.clone(),
                url: target,
                accept: request.accept.clone(),
                user_agent: request.user_agent.clone(),
            })
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Proxy request failed: {}", e);
                return (StatusCode::BAD_GATEWAY, "Upstream engine not accessible").into_response();
            }
        };

        let status = response.status();
        if !status.is_success() {
            debug!(path = %request.rest_path, %status, "Upstream refused proxied request");
            return (status, "Upstream error").into_response();
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let wants_json = request.wants_json(&content_type);
        if wants_json || request.is_playlist(&content_type) {
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!("Proxy body read failed: {}", e);
                    return (StatusCode::BAD_GATEWAY, "Upstream engine not accessible")
                        .into_response();
                }
            };
            let body = self.rewriter.rewrite_proxy_body(&body);

            return if wants_json {
                (
                    [
                        (header::CONTENT_TYPE, "application/json"),
                        (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
                    ],
                    body,
                )
                    .into_response()
            } else {
                playlist_response(body)
            };
        }

        let upstream_type = response.headers().get(header::CONTENT_TYPE).cloned();
        match response.bytes().await {
            Ok(bytes) => {
                let mut response = bytes.into_response();
                let headers = response.headers_mut();
                match upstream_type {
                    Some(value) => headers.insert(header::CONTENT_TYPE, value),
                    None => headers.remove(header::CONTENT_TYPE),
                };
                headers.insert(
                    header::ACCESS_CONTROL_ALLOW_ORIGIN,
                    HeaderValue::from_static("*"),
                );
                response
            }
            Err(e) => {
                warn!("Proxy body read failed: {}", e);
                (StatusCode::BAD_GATEWAY, "Upstream engine not accessible").into_response()
            }
        }
    }

    /// Fetches a session's playlist with upstream origins stripped.
    ///
    /// # Errors
    /// - `UpstreamError::Unavailable` / `Timeout` / `Status` - Playlist not fetched
    pub async fn session_manifest(&self, upstream_playback_url: &str) -> Result<String, UpstreamError> {
        let body = self.upstream.fetch_manifest(upstream_playback_url).await?;
        Ok(self.rewriter.strip_upstream_origin(&body))
    }
}

/// Non-cacheable HLS playlist response.
pub fn playlist_response(body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, MPEGURL),
            (header::CACHE_CONTROL, NO_STORE),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewriter(base_url: &str) -> ManifestRewriter {
        ManifestRewriter::new(&UpstreamConfig {
            base_url: base_url.to_string(),
            ..UpstreamConfig::default()
        })
        .unwrap()
    }

    const PLAYLIST: &str = "#EXTM3U\n\
        #EXT-X-TARGETDURATION:5\n\
        #EXTINF:5.0,\n\
        http://127.0.0.1:6878/ace/c/0f3a9b/1771.ts\n\
        #EXTINF:5.0,\n\
        http://acestream:6878/ace/c/0f3a9b/1772.ts\n";

    #[test]
    fn test_proxy_rewrite_any_host_on_engine_port() {
        let rewritten = rewriter("http://acestream:6878").rewrite_proxy_body(PLAYLIST);

        assert!(rewritten.contains("\n/ace/c/0f3a9b/1771.ts\n"));
        assert!(rewritten.contains("\n/ace/c/0f3a9b/1772.ts\n"));
        assert!(!rewritten.contains("6878"));
    }

    #[test]
    fn test_proxy_rewrite_leaves_foreign_urls() {
        let body = r#"{"response":{"playback_url":"http://engine:6878/ace/r/x/y.m3u8","logo":"http://cdn.example/ace/logo.png"}}"#;
        let rewritten = rewriter("http://engine:6878").rewrite_proxy_body(body);

        assert!(rewritten.contains(r#""playback_url":"/ace/r/x/y.m3u8""#));
        assert!(rewritten.contains("http://cdn.example/ace/logo.png"));
    }

    #[test]
    fn test_strip_origin_yields_absolute_paths() {
        let stripped = rewriter("http://acestream:6878").strip_upstream_origin(PLAYLIST);

        assert!(stripped.contains("\n/ace/c/0f3a9b/1771.ts\n"));
        assert!(stripped.contains("\n/ace/c/0f3a9b/1772.ts\n"));
        assert!(!stripped.contains("http"));
    }

    #[test]
    fn test_portless_base_matches_configured_host_only() {
        let rewriter = rewriter("http://engine.lan");
        let body = "http://engine.lan/ace/c/h/1.ts\nhttp://other.lan/ace/c/h/2.ts\n";

        assert_eq!(
            rewriter.rewrite_proxy_body(body),
            "/ace/c/h/1.ts\nhttp://other.lan/ace/c/h/2.ts\n"
        );
    }

    #[test]
    fn test_json_detection() {
        let request = ProxyRequest {
            method: Method::GET,
            rest_path: "manifest.m3u8".to_string(),
            query: Some("id=abc&format=json".to_string()),
            accept: None,
            user_agent: None,
        };
        assert!(request.wants_json("text/plain"));
        assert!(request.is_playlist(""));

        let plain = ProxyRequest {
            query: Some("id=abc".to_string()),
            rest_path: "stat".to_string(),
            ..request
        };
        assert!(!plain.wants_json("text/plain"));
        assert!(plain.wants_json("application/json; charset=utf-8"));
        assert!(!plain.is_playlist("application/octet-stream"));
    }

    #[test]
    fn test_playlist_response_headers() {
        let response = playlist_response("#EXTM3U\n".to_string());
        assert_eq!(response.headers()[header::CONTENT_TYPE], MPEGURL);
        assert_eq!(response.headers()[header::CACHE_CONTROL], NO_STORE);
    }
}
