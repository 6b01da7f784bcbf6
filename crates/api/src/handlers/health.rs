use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use orchestrator_brain::BrainState;
use serde_json::json;

use crate::routes::AppState;

/// 存活检查，大脑处于 error 或 shutdown 时返回503
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let brain_state = state.control_plane.brain().state().await;
    let healthy = !matches!(brain_state, BrainState::Error | BrainState::Shutdown);
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "brain_state": brain_state.as_str(),
            "timestamp": chrono::Utc::now(),
            "service": "orchestrator-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}
