use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use control_plane_core::ControlPlaneError;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("控制平面错误: {0}")]
    ControlPlane(#[from] ControlPlaneError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源")]
    NotFound,

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::ControlPlane(ControlPlaneError::TaskNotFound { .. }) | ApiError::NotFound => {
                StatusCode::NOT_FOUND
            }
            ApiError::ControlPlane(
                ControlPlaneError::InvalidCron { .. }
                | ControlPlaneError::InvalidTaskParams(_)
                | ControlPlaneError::ValidationError(_)
                | ControlPlaneError::UnknownEventType(_),
            )
            | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::ControlPlane(ControlPlaneError::TaskNotFound { .. }) => "TASK_NOT_FOUND",
            ApiError::ControlPlane(ControlPlaneError::InvalidCron { .. }) => {
                "INVALID_CRON_EXPRESSION"
            }
            ApiError::ControlPlane(ControlPlaneError::InvalidTaskParams(_)) => {
                "INVALID_TASK_PARAMS"
            }
            ApiError::ControlPlane(ControlPlaneError::ValidationError(_)) => "VALIDATION_ERROR",
            ApiError::ControlPlane(ControlPlaneError::UnknownEventType(_)) => {
                "UNKNOWN_EVENT_TYPE"
            }
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotFound => "NOT_FOUND",
            _ => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // 5xx 不向调用方暴露内部细节
        let message = if status.is_server_error() {
            error!("请求处理失败: {}", self);
            "系统内部错误".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "success": false,
            "data": null,
            "message": message,
            "error": {
                "type": self.error_type(),
                "code": status.as_u16(),
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
