//! Wire and domain types for the upstream engine control API.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Content-level identifier assigned by the upstream engine.
///
/// Several locally chosen content ids may resolve to the same infohash, and
/// transcode verdicts are keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InfoHash(String);

impl InfoHash {
    /// Wraps a raw identifier, rejecting empty values.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading characters used in log lines.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Endpoints the engine issues when playback of a content id starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackGrant {
    pub playback_url: String,
    pub stat_url: Option<String>,
    pub command_url: Option<String>,
    pub infohash: Option<InfoHash>,
}

/// Live statistics of one playback session as reported by the engine.
///
/// Only the fields the core reasons about are typed; everything else the
/// engine reports is kept in `extra` and handed back to API clients as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    #[serde(default)]
    pub peers: u32,
    #[serde(default)]
    pub speed_down: u64,
    #[serde(default)]
    pub speed_up: u64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Standard `{ "response": ..., "error": ... }` wrapper used by the engine.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    #[serde(default = "Option::default")]
    pub response: Option<T>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl<T> Envelope<T> {
    /// Error message reported by the engine, ignoring `null` and empty strings.
    pub fn error_message(&self) -> Option<String> {
        match &self.error {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) if s.is_empty() => None,
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

/// Payload of a successful start request.
#[derive(Debug, Deserialize)]
pub(crate) struct StartPayload {
    #[serde(default)]
    pub infohash: Option<String>,
    #[serde(default)]
    pub playback_url: Option<String>,
    #[serde(default)]
    pub stat_url: Option<String>,
    #[serde(default)]
    pub command_url: Option<String>,
}
