//! Link health check API.

use acebridge_core::LinkStore;
use acebridge_core::health::{LinkCheckResult, LinkReport, SweepProgress, SweepStart};
use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;
use tracing::warn;

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct SweepResponse {
    /// False when a sweep was already running
    pub started: bool,
    #[serde(flatten)]
    pub progress: SweepProgress,
}

/// Starts a background sweep over all links, or reports the running one.
pub async fn start_check(State(state): State<AppState>) -> Json<SweepResponse> {
    let response = match state.checker.start_sweep(state.link_store()) {
        SweepStart::Started => SweepResponse {
            started: true,
            progress: state.checker.progress(),
        },
        SweepStart::AlreadyRunning(progress) => SweepResponse {
            started: false,
            progress,
        },
    };
    Json(response)
}

pub async fn check_status(State(state): State<AppState>) -> Json<SweepProgress> {
    Json(state.checker.progress())
}

/// Checks one link and records the result. Refused while a sweep runs.
pub async fn check_link(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<LinkCheckResult>, ApiError> {
    let result = state.checker.check_single(&hash).await?;

    if let Err(e) = state.links.record(&hash, &result).await {
        warn!(hash = %hash, "Failed to record link result: {}", e);
    }
    Ok(Json(result))
}

pub async fn check_links(State(state): State<AppState>) -> Json<Vec<LinkReport>> {
    Json(state.links.reports())
}
