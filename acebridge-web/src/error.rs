//! JSON API error responses.

use acebridge_core::{BridgeError, HealthCheckError, UpstreamError};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::warn;

/// Errors returned by API handlers, rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no active session for {content_id}")]
    SessionNotFound { content_id: String },

    #[error("a link sweep is already running")]
    SweepInProgress,

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl From<HealthCheckError> for ApiError {
    fn from(error: HealthCheckError) -> Self {
        match error {
            HealthCheckError::SweepInProgress => ApiError::SweepInProgress,
            other => ApiError::Internal {
                reason: other.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::SweepInProgress => StatusCode::CONFLICT,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match self {
            ApiError::SessionNotFound { .. } => "No active session".to_string(),
            ApiError::Upstream(e) => {
                warn!("Upstream request failed: {}", e);
                BridgeError::Upstream(e).user_message()
            }
            ApiError::Internal { reason } => {
                warn!("Internal API error: {}", reason);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                ApiError::SessionNotFound {
                    content_id: "x".to_string(),
                },
                StatusCode::NOT_FOUND,
            ),
            (ApiError::SweepInProgress, StatusCode::CONFLICT),
            (
                ApiError::Upstream(UpstreamError::ProtocolError {
                    message: "no playback URL returned by engine".to_string(),
                }),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ApiError::from(HealthCheckError::Store {
                    message: "disk full".to_string(),
                }),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
