//! HTTP client for the upstream engine with per-operation timeouts.

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::{ACCEPT, USER_AGENT};
use tracing::{debug, warn};

use super::types::{Envelope, InfoHash, PlaybackGrant, StartPayload, StreamStats};
use super::{EngineControl, UpstreamError};
use crate::config::UpstreamConfig;

/// Request forwarded verbatim to the engine by the control proxy.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    pub url: String,
    pub accept: Option<String>,
    pub user_agent: Option<String>,
}

/// HTTP implementation of the engine API.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    config: UpstreamConfig,
    client: reqwest::Client,
}

impl UpstreamClient {
    /// Creates a client for the engine described by `config`.
    ///
    /// No overall request timeout is installed on the client itself: segment
    /// bodies are streamed for as long as the viewer stays connected, so each
    /// control operation applies its own budget instead.
    pub fn new(config: &UpstreamConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(config.control_timeout)
            .user_agent(config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()
            .unwrap_or_else(|e| {
                warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });

        Self {
            config: config.clone(),
            client,
        }
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Absolute engine URL for a path below the playback prefix.
    ///
    /// `rest_path` is relative to `/<prefix>/`; `query` excludes the `?`.
    pub fn playback_target(&self, rest_path: &str, query: Option<&str>) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let rest = rest_path.trim_start_matches('/');
        match query.filter(|q| !q.is_empty()) {
            Some(q) => format!("{base}/{}/{rest}?{q}", self.config.proxy_prefix),
            None => format!("{base}/{}/{rest}", self.config.proxy_prefix),
        }
    }

    /// Opens a media segment for streaming.
    ///
    /// The response is returned whatever its status so the relay can pass
    /// upstream errors through unmodified. Dropping the response (or the
    /// future) cancels the transfer.
    ///
    /// # Errors
    /// - `UpstreamError::Unavailable` - Connection to the engine failed
    pub async fn open_segment(&self, url: &str) -> Result<reqwest::Response, UpstreamError> {
        debug!("Opening upstream segment {}", url);
        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(url, e))
    }

    /// Forwards a manifest or control request within the control budget.
    ///
    /// The timeout covers reading the body too, so callers must consume the
    /// body before it elapses.
    ///
    /// # Errors
    /// - `UpstreamError::Unavailable` / `Timeout` - Engine not reachable in time
    pub async fn forward(&self, request: ForwardRequest) -> Result<reqwest::Response, UpstreamError> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .timeout(self.config.control_timeout)
            .header(ACCEPT, request.accept.as_deref().unwrap_or("*/*"));

        if let Some(agent) = request.user_agent.as_deref() {
            builder = builder.header(USER_AGENT, agent);
        }

        builder
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(&request.url, e))
    }

    /// Fetches a session playlist as text.
    ///
    /// # Errors
    /// - `UpstreamError::Unavailable` / `Timeout` - Engine not reachable in time
    /// - `UpstreamError::Status` - Engine answered with a non-success status
    pub async fn fetch_manifest(&self, url: &str) -> Result<String, UpstreamError> {
        let response = self
            .client
            .get(url)
            .timeout(self.config.control_timeout)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| UpstreamError::from_reqwest(url, e))
    }

    async fn get_json(
        &self,
        url: &str,
        timeout: std::time::Duration,
    ) -> Result<serde_json::Value, UpstreamError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| UpstreamError::from_reqwest(url, e))
    }
}

fn append_query(url: &str, pair: &str) -> String {
    if url.contains('?') {
        format!("{url}&{pair}")
    } else {
        format!("{url}?{pair}")
    }
}

#[async_trait]
impl EngineControl for UpstreamClient {
    async fn start_playback(&self, content_id: &str) -> Result<PlaybackGrant, UpstreamError> {
        let query = format!("id={}&format=json", urlencoding::encode(content_id));
        let url = self.playback_target("manifest.m3u8", Some(&query));

        let body = self.get_json(&url, self.config.control_timeout).await?;
        let envelope: Envelope<StartPayload> =
            serde_json::from_value(body).map_err(|e| UpstreamError::ProtocolError {
                message: format!("unexpected start response: {e}"),
            })?;

        if let Some(message) = envelope.error_message() {
            return Err(UpstreamError::EngineRejected { message });
        }

        let payload = envelope.response.ok_or_else(|| UpstreamError::ProtocolError {
            message: "start response has no payload".to_string(),
        })?;

        let playback_url = payload
            .playback_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| UpstreamError::ProtocolError {
                message: "no playback URL returned by engine".to_string(),
            })?;

        Ok(PlaybackGrant {
            playback_url,
            stat_url: payload.stat_url.filter(|u| !u.is_empty()),
            command_url: payload.command_url.filter(|u| !u.is_empty()),
            infohash: payload.infohash.and_then(InfoHash::new),
        })
    }

    async fn fetch_stats(&self, stat_url: &str) -> Result<StreamStats, UpstreamError> {
        let body = self.get_json(stat_url, self.config.stats_timeout).await?;
        let envelope: Envelope<StreamStats> =
            serde_json::from_value(body).map_err(|e| UpstreamError::ProtocolError {
                message: format!("unexpected stats response: {e}"),
            })?;

        let error = envelope.error_message();
        envelope.response.ok_or_else(|| UpstreamError::ProtocolError {
            message: error.unwrap_or_else(|| "stats response has no payload".to_string()),
        })
    }

    async fn send_stop(&self, command_url: &str) -> Result<(), UpstreamError> {
        let url = append_query(command_url, "method=stop");
        let response = self
            .client
            .get(&url)
            .timeout(self.config.command_timeout)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(&url, e))?;

        if !response.status().is_success() {
            return Err(UpstreamError::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn engine_version(&self) -> Result<serde_json::Value, UpstreamError> {
        let base = self.config.base_url.trim_end_matches('/');
        let url = format!("{base}/webui/api/service?method=get_version");
        self.get_json(&url, self.config.stats_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> UpstreamClient {
        UpstreamClient::new(&UpstreamConfig {
            base_url: "http://engine:6878/".to_string(),
            ..UpstreamConfig::default()
        })
    }

    #[test]
    fn test_playback_target() {
        let client = client();
        assert_eq!(
            client.playback_target("c/abc/1.ts", None),
            "http://engine:6878/ace/c/abc/1.ts"
        );
        assert_eq!(
            client.playback_target("/manifest.m3u8", Some("id=x&format=json")),
            "http://engine:6878/ace/manifest.m3u8?id=x&format=json"
        );
        assert_eq!(
            client.playback_target("r/abc/x.m3u8", Some("")),
            "http://engine:6878/ace/r/abc/x.m3u8"
        );
    }

    #[test]
    fn test_append_query() {
        assert_eq!(
            append_query("http://e/ace/cmd/abc", "method=stop"),
            "http://e/ace/cmd/abc?method=stop"
        );
        assert_eq!(
            append_query("http://e/ace/cmd?token=1", "method=stop"),
            "http://e/ace/cmd?token=1&method=stop"
        );
    }
}
