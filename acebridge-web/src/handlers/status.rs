use axum::Json;
use axum::extract::State;
use serde_json::json;

use crate::server::AppState;

/// Runtime overview: encoder mode, sessions, cached verdicts, live encoders.
pub async fn api_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "encoderMode": state.encoder_mode.to_string(),
        "activeSessions": state.sessions.active_count(),
        "cachedVerdicts": state.relay.cache().len(),
        "activeEncoders": state.relay.pipe().active_processes(),
        "sweep": state.checker.progress(),
    }))
}
