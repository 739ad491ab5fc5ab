use thiserror::Error;

/// 控制平面错误类型定义
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),

    #[error("验证错误: {0}")]
    ValidationError(String),

    #[error("未知的事件类型: {0}")]
    UnknownEventType(String),

    #[error("事件总线错误: {0}")]
    EventBus(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl ControlPlaneError {
    pub fn task_not_found(id: i64) -> Self {
        Self::TaskNotFound { id }
    }
    pub fn invalid_params<S: Into<String>>(msg: S) -> Self {
        Self::InvalidTaskParams(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }
    pub fn event_bus<S: Into<String>>(msg: S) -> Self {
        Self::EventBus(msg.into())
    }
    pub fn execution<S: Into<String>>(msg: S) -> Self {
        Self::TaskExecution(msg.into())
    }

    /// 调用方输入有误（非法cron、缺失字段等），重试不会改变结果
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ControlPlaneError::TaskNotFound { .. }
                | ControlPlaneError::InvalidCron { .. }
                | ControlPlaneError::InvalidTaskParams(_)
                | ControlPlaneError::ValidationError(_)
                | ControlPlaneError::UnknownEventType(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ControlPlaneError::Database(_)
                | ControlPlaneError::EventBus(_)
                | ControlPlaneError::Network(_)
                | ControlPlaneError::Timeout(_)
        )
    }

    pub fn user_message(&self) -> &str {
        match self {
            ControlPlaneError::TaskNotFound { .. } => "请求的任务不存在",
            ControlPlaneError::InvalidCron { .. } => "CRON表达式格式有误",
            ControlPlaneError::InvalidTaskParams(_) => "任务参数配置有误",
            ControlPlaneError::ValidationError(_) => "输入数据验证失败",
            ControlPlaneError::UnknownEventType(_) => "不支持的事件类型",
            ControlPlaneError::Timeout(_) => "操作超时，请稍后重试",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for ControlPlaneError {
    fn from(err: serde_json::Error) -> Self {
        ControlPlaneError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for ControlPlaneError {
    fn from(err: anyhow::Error) -> Self {
        ControlPlaneError::Internal(err.to_string())
    }
}
