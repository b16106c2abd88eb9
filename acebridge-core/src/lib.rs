//! Acebridge Core - session, transcode-decision and relay engine
//!
//! This crate fronts a peer-to-peer media engine: it binds content ids to
//! the engine's ephemeral playback endpoints, decides per stream whether
//! media must be transcoded for browsers, relays segments accordingly and
//! checks link viability.

pub mod config;
pub mod health;
pub mod relay;
pub mod session;
pub mod tracing_setup;
pub mod transcode;
pub mod upstream;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_mocks;

// Re-export main types for convenient access
pub use config::BridgeConfig;
pub use health::{HealthCheckError, HealthChecker, LinkCheckResult, LinkStatus, LinkStore};
pub use relay::{ControlProxy, SegmentRelay};
pub use session::{SessionManager, StreamSession};
pub use transcode::{ProbeError, TranscodeError};
pub use upstream::{UpstreamClient, UpstreamError};

/// Core errors that can bubble up from any Acebridge subsystem.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Health check error: {0}")]
    HealthCheck(#[from] HealthCheckError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            BridgeError::Upstream(e) => match e {
                UpstreamError::Unavailable { .. } | UpstreamError::Timeout { .. } => {
                    "Media engine not accessible".to_string()
                }
                UpstreamError::Status { status, .. } => {
                    format!("Media engine returned status {status}")
                }
                UpstreamError::ProtocolError { message } => {
                    format!("Unexpected media engine response: {message}")
                }
                UpstreamError::EngineRejected { message } => {
                    format!("Media engine refused the stream: {message}")
                }
            },
            BridgeError::HealthCheck(HealthCheckError::SweepInProgress) => {
                "A link check is already running".to_string()
            }
            BridgeError::HealthCheck(_) => "Link check error occurred".to_string(),
            BridgeError::Configuration { reason } => format!("Configuration error: {reason}"),
            BridgeError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error was caused by the caller rather than the system.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            BridgeError::Configuration { .. }
                | BridgeError::HealthCheck(HealthCheckError::SweepInProgress)
        )
    }
}

impl From<regex::Error> for BridgeError {
    fn from(error: regex::Error) -> Self {
        BridgeError::Configuration {
            reason: format!("invalid upstream URL pattern: {error}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        let unreachable = BridgeError::from(UpstreamError::Unavailable {
            url: "http://engine".to_string(),
            reason: "refused".to_string(),
        });
        assert_eq!(unreachable.user_message(), "Media engine not accessible");
        assert!(!unreachable.is_user_error());

        let busy = BridgeError::from(HealthCheckError::SweepInProgress);
        assert_eq!(busy.user_message(), "A link check is already running");
        assert!(busy.is_user_error());

        let pattern = regex::Regex::new("(").unwrap_err();
        let misconfigured = BridgeError::from(pattern);
        assert!(
            misconfigured
                .user_message()
                .starts_with("Configuration error: invalid upstream URL pattern")
        );
        assert!(misconfigured.is_user_error());

        let io = BridgeError::from(std::io::Error::new(std::io::ErrorKind::AddrInUse, "taken"));
        assert_eq!(io.user_message(), "File system error occurred");
        assert!(!io.is_user_error());
    }
}
