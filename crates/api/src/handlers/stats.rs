use axum::{
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;

use crate::{response::success, routes::AppState};

pub async fn get_queue_stats(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.control_plane.brain().scheduler().get_queue_stats().await;
    success(stats)
}

#[derive(Debug, Deserialize)]
pub struct WorkerStatsQuery {
    pub queue: Option<String>,
}

pub async fn get_worker_stats(
    State(state): State<AppState>,
    Query(params): Query<WorkerStatsQuery>,
) -> impl IntoResponse {
    let stats = state
        .control_plane
        .brain()
        .pool_manager()
        .get_worker_stats(params.queue.as_deref())
        .await;
    success(stats)
}

pub async fn get_coordination_stats(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state
        .control_plane
        .brain()
        .coordinator()
        .get_coordination_stats()
        .await;
    success(stats)
}
