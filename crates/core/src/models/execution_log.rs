use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ControlPlaneError, ControlPlaneResult};

/// 执行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecuteResult {
    Failure,
    Success,
    Partial,
}

impl ExecuteResult {
    /// 数据库中的结果编码
    pub fn code(self) -> i64 {
        match self {
            ExecuteResult::Failure => 0,
            ExecuteResult::Success => 1,
            ExecuteResult::Partial => 2,
        }
    }

    pub fn from_code(code: i64) -> ControlPlaneResult<Self> {
        match code {
            0 => Ok(ExecuteResult::Failure),
            1 => Ok(ExecuteResult::Success),
            2 => Ok(ExecuteResult::Partial),
            other => Err(ControlPlaneError::Serialization(format!(
                "未知的执行结果编码: {other}"
            ))),
        }
    }
}

/// 任务执行日志
///
/// 每次触发产生且仅产生一条，运行结束后写入，之后不再修改。
/// 只有保留期清理会删除它。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecutionLog {
    pub id: i64,
    pub task_id: i64,
    /// 本次执行的开始时间
    pub execute_time: DateTime<Utc>,
    pub execute_result: ExecuteResult,
    /// 执行耗时（毫秒）
    pub execute_duration: Option<i64>,
    /// 成功时为空
    pub error_message: String,
    pub created_at: DateTime<Utc>,
}

/// 待写入的执行日志
#[derive(Debug, Clone, PartialEq)]
pub struct NewExecutionLog {
    pub task_id: i64,
    pub execute_time: DateTime<Utc>,
    pub execute_result: ExecuteResult,
    pub execute_duration: Option<i64>,
    pub error_message: String,
}

impl NewExecutionLog {
    pub fn success(task_id: i64, execute_time: DateTime<Utc>, duration_ms: i64) -> Self {
        Self {
            task_id,
            execute_time,
            execute_result: ExecuteResult::Success,
            execute_duration: Some(duration_ms),
            error_message: String::new(),
        }
    }

    pub fn failure(
        task_id: i64,
        execute_time: DateTime<Utc>,
        duration_ms: i64,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            execute_time,
            execute_result: ExecuteResult::Failure,
            execute_duration: Some(duration_ms),
            error_message: error_message.into(),
        }
    }

    pub fn into_log(self, id: i64, created_at: DateTime<Utc>) -> TaskExecutionLog {
        TaskExecutionLog {
            id,
            task_id: self.task_id,
            execute_time: self.execute_time,
            execute_result: self.execute_result,
            execute_duration: self.execute_duration,
            error_message: self.error_message,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_codes() {
        for result in [
            ExecuteResult::Failure,
            ExecuteResult::Success,
            ExecuteResult::Partial,
        ] {
            assert_eq!(ExecuteResult::from_code(result.code()).unwrap(), result);
        }
        assert!(ExecuteResult::from_code(7).is_err());
    }

    #[test]
    fn test_new_log_constructors() {
        let now = Utc::now();
        let ok = NewExecutionLog::success(3, now, 12);
        assert_eq!(ok.execute_result, ExecuteResult::Success);
        assert!(ok.error_message.is_empty());

        let failed = NewExecutionLog::failure(3, now, 5, "boom");
        let log = failed.into_log(9, now);
        assert_eq!(log.id, 9);
        assert_eq!(log.execute_result, ExecuteResult::Failure);
        assert_eq!(log.error_message, "boom");
        assert_eq!(log.execute_duration, Some(5));
    }
}
