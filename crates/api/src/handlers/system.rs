use axum::{extract::State, response::IntoResponse};

use crate::{response::success, routes::AppState};

pub async fn get_system_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.control_plane.brain().get_system_status().await;
    success(status)
}
