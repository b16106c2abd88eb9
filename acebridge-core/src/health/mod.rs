//! Link viability checks.
//!
//! A check starts a stream, lets the swarm converge, reads the peer count
//! once and stops the stream again. Sweeps run checks over every link in a
//! [`LinkStore`] one at a time.

pub mod checker;
pub mod store;

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use checker::{HealthChecker, SweepOutcome, SweepProgress, SweepStart};
pub use store::{LinkRef, LinkReport, LinkStore, MemoryLinkStore};

/// Errors from health checking and link storage.
#[derive(Debug, thiserror::Error)]
pub enum HealthCheckError {
    #[error("a link sweep is already running")]
    SweepInProgress,

    #[error("failed to read link file {path}: {source}")]
    LinkFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid link file {path}: {source}")]
    LinkFileFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("link store failure: {message}")]
    Store { message: String },
}

/// Viability classification of one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Ok,
    Low,
    Fail,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Ok => write!(f, "ok"),
            LinkStatus::Low => write!(f, "low"),
            LinkStatus::Fail => write!(f, "fail"),
        }
    }
}

/// Outcome of a single link check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkCheckResult {
    pub status: LinkStatus,
    pub peer_count: u32,
    #[serde(rename = "lastCheckedAt")]
    pub checked_at: DateTime<Utc>,
}

impl LinkCheckResult {
    pub fn failed() -> Self {
        Self {
            status: LinkStatus::Fail,
            peer_count: 0,
            checked_at: Utc::now(),
        }
    }
}

/// Classifies a peer count: at least `ok_threshold` is ok, any peers is low.
pub fn classify(peers: u32, ok_threshold: u32) -> LinkStatus {
    if peers >= ok_threshold {
        LinkStatus::Ok
    } else if peers >= 1 {
        LinkStatus::Low
    } else {
        LinkStatus::Fail
    }
}
