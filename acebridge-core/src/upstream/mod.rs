//! Upstream P2P engine access.
//!
//! `EngineControl` is the narrow control surface (start, stats, stop) that
//! the session manager and health checker depend on; `UpstreamClient` is the
//! HTTP implementation and additionally exposes raw segment and manifest
//! fetches for the relay.

pub mod client;
pub mod types;

use async_trait::async_trait;
pub use client::UpstreamClient;
pub use types::{InfoHash, PlaybackGrant, StreamStats};

/// Errors talking to the upstream engine.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Connection-level failure reaching the engine.
    #[error("upstream engine unreachable at {url}: {reason}")]
    Unavailable { url: String, reason: String },

    /// Request exceeded its time budget.
    #[error("upstream request to {url} timed out")]
    Timeout { url: String },

    /// Engine answered with a non-success status.
    #[error("upstream returned status {status} for {url}")]
    Status { url: String, status: u16 },

    /// Response was successful but malformed or missing required fields.
    #[error("malformed upstream response: {message}")]
    ProtocolError { message: String },

    /// Engine reported an error in its response envelope.
    #[error("engine rejected request: {message}")]
    EngineRejected { message: String },
}

impl UpstreamError {
    /// True for failures that mean the engine could not be reached or did not
    /// serve the request, as opposed to answering with bad data.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            UpstreamError::Unavailable { .. }
                | UpstreamError::Timeout { .. }
                | UpstreamError::Status { .. }
        )
    }

    pub(crate) fn from_reqwest(url: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            UpstreamError::Timeout {
                url: url.to_string(),
            }
        } else if error.is_decode() {
            UpstreamError::ProtocolError {
                message: format!("undecodable body from {url}: {error}"),
            }
        } else {
            UpstreamError::Unavailable {
                url: url.to_string(),
                reason: error.to_string(),
            }
        }
    }
}

/// Control operations on the upstream engine.
#[async_trait]
pub trait EngineControl: Send + Sync {
    /// Requests playback of `content_id` and returns the issued endpoints.
    ///
    /// # Errors
    /// - `UpstreamError::Unavailable` / `Timeout` / `Status` - Engine not reachable or refused
    /// - `UpstreamError::EngineRejected` - Engine reported an error for this content
    /// - `UpstreamError::ProtocolError` - Response lacks a playback URL
    async fn start_playback(&self, content_id: &str) -> Result<PlaybackGrant, UpstreamError>;

    /// Reads live statistics from a session's stat URL.
    ///
    /// # Errors
    /// - `UpstreamError::Timeout` - Stats did not arrive within the stats budget
    /// - `UpstreamError::ProtocolError` - Response carried no stats payload
    async fn fetch_stats(&self, stat_url: &str) -> Result<StreamStats, UpstreamError>;

    /// Sends the stop command to a session's control URL.
    ///
    /// # Errors
    /// - `UpstreamError::Unavailable` / `Timeout` / `Status` - Command not delivered
    async fn send_stop(&self, command_url: &str) -> Result<(), UpstreamError>;

    /// Engine version information, passed through verbatim.
    ///
    /// # Errors
    /// - `UpstreamError::Unavailable` / `Timeout` / `Status` - Engine not reachable
    async fn engine_version(&self) -> Result<serde_json::Value, UpstreamError>;
}
