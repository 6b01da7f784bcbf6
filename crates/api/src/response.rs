use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T> ApiResponse<T>
where
    T: Serialize,
{
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message),
            timestamp: chrono::Utc::now(),
        }
    }
}

impl ApiResponse<()> {
    pub fn failure(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            timestamp: chrono::Utc::now(),
        }
    }
}

impl<T> IntoResponse for ApiResponse<T>
where
    T: Serialize,
{
    fn into_response(self) -> axum::response::Response {
        Json(self).into_response()
    }
}

pub fn success<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::OK, ApiResponse::success(data))
}

pub fn accepted<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::ACCEPTED, ApiResponse::success(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_serialization() {
        let response = ApiResponse::success("queued");
        let json = serde_json::to_string(&response).unwrap();

        assert!(json.contains("\"success\":true"));
        assert!(json.contains("\"data\":\"queued\""));
        assert!(json.contains("\"message\":null"));
        assert!(json.contains("\"timestamp\""));
    }

    #[test]
    fn test_failure_envelope() {
        let response = ApiResponse::failure("任务未找到: t-1".to_string());
        assert!(!response.success);
        assert!(response.data.is_none());
        assert_eq!(response.message.as_deref(), Some("任务未找到: t-1"));
    }

    #[test]
    fn test_envelope_deserialization() {
        let json_str = r#"{
            "success": true,
            "data": {"pending": 2},
            "message": "ok",
            "timestamp": "2024-01-01T00:00:00Z"
        }"#;

        let response: ApiResponse<serde_json::Value> = serde_json::from_str(json_str).unwrap();
        assert!(response.success);
        assert_eq!(response.data.unwrap()["pending"], 2);
        assert_eq!(response.message, Some("ok".to_string()));
    }
}
