use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use orchestrator_core::OrchestratorError;
use tracing::error;

use crate::response::ApiResponse;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源: {0}")]
    NotFound(String),

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Orchestrator(err) => match err {
                OrchestratorError::TaskNotFound { .. }
                | OrchestratorError::AgentNotFound { .. }
                | OrchestratorError::WorkerNotFound { .. }
                | OrchestratorError::PoolNotFound { .. }
                | OrchestratorError::WorkflowNotFound { .. }
                | OrchestratorError::DecisionNotFound { .. } => StatusCode::NOT_FOUND,
                OrchestratorError::InvalidCommand(_)
                | OrchestratorError::InvalidPriority(_)
                | OrchestratorError::CircularDependency { .. } => StatusCode::BAD_REQUEST,
                OrchestratorError::DuplicateTask { .. } => StatusCode::CONFLICT,
                OrchestratorError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("API请求处理失败: {}", self);
        }
        (status, ApiResponse::failure(self.to_string())).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_variants_map_to_404() {
        let err = ApiError::from(OrchestratorError::DecisionNotFound { id: "d-1".to_string() });
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        let err = ApiError::from(OrchestratorError::PoolNotFound { queue: "qa".to_string() });
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_client_errors() {
        assert_eq!(
            ApiError::from(OrchestratorError::InvalidPriority(9)).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(OrchestratorError::DuplicateTask { id: "t".to_string() }).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::BadRequest("缺少参数".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_server_errors() {
        assert_eq!(
            ApiError::from(OrchestratorError::Timeout("回调".to_string())).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::from(OrchestratorError::Persistence("redis".to_string())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_message_keeps_orchestrator_text() {
        let err = ApiError::from(OrchestratorError::TaskNotFound { id: "t-7".to_string() });
        assert_eq!(err.to_string(), "任务未找到: t-7");
    }
}
