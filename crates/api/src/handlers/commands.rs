use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use orchestrator_brain::{CommandRequest, CommandStatus};
use tracing::debug;

use crate::{
    error::{ApiError, ApiResult},
    response::{success, ApiResponse},
    routes::AppState,
};

/// 同步执行控制面命令，响应体为最终的命令记录
///
/// 命令本身失败时HTTP状态仍为200，`success` 为 false，`message` 携带失败原因。
pub async fn execute_command(
    State(state): State<AppState>,
    payload: Result<Json<CommandRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    debug!("收到控制面命令: {}", request.command);

    let record = state.control_plane.execute_command(request).await;
    let succeeded = record.status == CommandStatus::Completed;
    let message = record.error.clone();
    let mut response = ApiResponse::success(record);
    response.success = succeeded;
    response.message = message;

    Ok((StatusCode::OK, response))
}

pub async fn get_command(
    State(state): State<AppState>,
    Path(command_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let record = state
        .control_plane
        .get_command_status(&command_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("命令 {command_id}")))?;
    Ok(success(record))
}
