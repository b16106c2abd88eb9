//! Session table keyed by content id.
//!
//! Sessions live until explicitly stopped. Starting a content id that already
//! has a session replaces the entry without stopping the previous upstream
//! session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::upstream::{EngineControl, InfoHash, StreamStats, UpstreamError};

/// One active P2P to HTTP binding.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSession {
    pub content_id: String,
    pub infohash: Option<InfoHash>,
    /// Path clients use to fetch the playlist through this server
    pub relative_playback_path: String,
    #[serde(skip)]
    pub upstream_playback_url: String,
    #[serde(skip)]
    pub upstream_stat_url: Option<String>,
    #[serde(skip)]
    pub upstream_control_url: Option<String>,
    pub started_at: DateTime<Utc>,
    pub requested_by: Option<String>,
}

/// Owns all live sessions and mediates engine control calls for them.
pub struct SessionManager {
    engine: Arc<dyn EngineControl>,
    sessions: RwLock<HashMap<String, StreamSession>>,
    manifest_path_prefix: String,
    stats_timeout: Duration,
}

impl SessionManager {
    /// Creates an empty session table.
    ///
    /// `manifest_path_prefix` is the route serving session playlists, e.g.
    /// `/api/stream/manifest`; the content id is appended to it.
    pub fn new(
        engine: Arc<dyn EngineControl>,
        manifest_path_prefix: impl Into<String>,
        stats_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            sessions: RwLock::new(HashMap::new()),
            manifest_path_prefix: manifest_path_prefix.into(),
            stats_timeout,
        }
    }

    /// Starts upstream playback of `content_id` and records the session.
    ///
    /// # Errors
    /// - `UpstreamError::Unavailable` / `Timeout` / `Status` - Engine unreachable or refused
    /// - `UpstreamError::ProtocolError` - Engine returned no playback URL
    /// - `UpstreamError::EngineRejected` - Engine reported an error for this content
    pub async fn start(
        &self,
        content_id: &str,
        requested_by: Option<String>,
    ) -> Result<StreamSession, UpstreamError> {
        let grant = self.engine.start_playback(content_id).await?;

        let session = StreamSession {
            content_id: content_id.to_string(),
            infohash: grant.infohash,
            relative_playback_path: format!(
                "{}/{}",
                self.manifest_path_prefix.trim_end_matches('/'),
                urlencoding::encode(content_id)
            ),
            upstream_playback_url: grant.playback_url,
            upstream_stat_url: grant.stat_url,
            upstream_control_url: grant.command_url,
            started_at: Utc::now(),
            requested_by,
        };

        let replaced = self
            .sessions
            .write()
            .insert(content_id.to_string(), session.clone());

        info!(
            content_id,
            infohash = session.infohash.as_ref().map(|h| h.short()),
            replaced = replaced.is_some(),
            "Stream session started"
        );

        Ok(session)
    }

    /// Looks up the session for `content_id` without touching the engine.
    pub fn get(&self, content_id: &str) -> Option<StreamSession> {
        self.sessions.read().get(content_id).cloned()
    }

    /// Stops the session for `content_id`.
    ///
    /// The upstream stop command is best effort; the local entry is removed
    /// regardless. Unknown content ids are a no-op.
    pub async fn stop(&self, content_id: &str) {
        let removed = self.sessions.write().remove(content_id);

        let Some(session) = removed else {
            debug!(content_id, "Stop requested for unknown session");
            return;
        };

        if let Some(command_url) = session.upstream_control_url.as_deref() {
            if let Err(e) = self.engine.send_stop(command_url).await {
                warn!(content_id, "Upstream stop failed: {}", e);
            }
        }

        info!(content_id, "Stream session stopped");
    }

    /// Current upstream statistics for `content_id`.
    ///
    /// Returns `None` when there is no session, the session has no stat URL,
    /// or the engine fails to answer within the stats budget.
    pub async fn stats(&self, content_id: &str) -> Option<StreamStats> {
        let stat_url = self.get(content_id)?.upstream_stat_url?;

        match tokio::time::timeout(self.stats_timeout, self.engine.fetch_stats(&stat_url)).await {
            Ok(Ok(stats)) => Some(stats),
            Ok(Err(e)) => {
                debug!(content_id, "Stats unavailable: {}", e);
                None
            }
            Err(_) => {
                debug!(content_id, "Stats request timed out");
                None
            }
        }
    }

    /// Engine version, passed through from the upstream.
    ///
    /// # Errors
    /// - `UpstreamError` - Engine not reachable
    pub async fn engine_version(&self) -> Result<serde_json::Value, UpstreamError> {
        self.engine.engine_version().await
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Snapshot of all live sessions.
    pub fn sessions(&self) -> Vec<StreamSession> {
        self.sessions.read().values().cloned().collect()
    }
}
