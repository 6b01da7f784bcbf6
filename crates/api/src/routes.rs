use axum::{
    routing::{get, post},
    Router,
};
use orchestrator_brain::ControlPlane;
use std::sync::Arc;

use crate::handlers::{
    commands::{execute_command, get_command},
    decisions::{approve_decision, list_decisions, reject_decision},
    health::health_check,
    stats::{get_coordination_stats, get_queue_stats, get_worker_stats},
    system::get_system_status,
};

#[derive(Clone)]
pub struct AppState {
    pub control_plane: Arc<ControlPlane>,
}

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/status", get(get_system_status))
        .route("/api/commands", post(execute_command))
        .route("/api/commands/{id}", get(get_command))
        .route("/api/queue/stats", get(get_queue_stats))
        .route("/api/workers/stats", get(get_worker_stats))
        .route("/api/coordination/stats", get(get_coordination_stats))
        .route("/api/decisions", get(list_decisions))
        .route("/api/decisions/{id}/approve", post(approve_decision))
        .route("/api/decisions/{id}/reject", post(reject_decision))
        .with_state(state)
}
