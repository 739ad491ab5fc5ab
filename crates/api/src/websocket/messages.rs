use serde::{Deserialize, Serialize};

use control_plane_core::TaskExecutionLog;

use crate::handlers::tasks::MAX_LOG_LIMIT;

/// 未指定或指定了非正数时的回放条数
pub const DEFAULT_BACKLOG_LIMIT: i64 = 100;

/// 日志订阅请求 `{"taskId": 7, "limit": 20}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub task_id: i64,
    #[serde(default)]
    pub limit: Option<i64>,
}

impl SubscribeRequest {
    pub fn effective_limit(&self) -> i64 {
        match self.limit {
            Some(limit) if limit > 0 => limit.min(MAX_LOG_LIMIT),
            _ => DEFAULT_BACKLOG_LIMIT,
        }
    }
}

/// 日志流下行消息
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogStreamMessage {
    /// 订阅时回放的历史日志，最新的在前
    Logs { data: Vec<TaskExecutionLog> },
    LogUpdate {
        #[serde(rename = "taskId")]
        task_id: i64,
        data: TaskExecutionLog,
    },
    Error { error: String },
}

impl LogStreamMessage {
    pub fn error(message: impl Into<String>) -> Self {
        LogStreamMessage::Error {
            error: message.into(),
        }
    }
}
