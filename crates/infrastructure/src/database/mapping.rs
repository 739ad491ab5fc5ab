//! SQLite行到领域模型的映射工具

use std::str::FromStr;

use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use control_plane_core::{
    ControlPlaneError, ControlPlaneResult, ExecMode, ExecuteResult, ScheduledTask,
    TaskExecutionLog, TaskKind, TaskStatus,
};

pub struct MappingHelpers;

impl MappingHelpers {
    /// 解析以JSON文本存储的任务参数，空值视为空对象
    pub fn parse_params(row: &SqliteRow, field_name: &str) -> ControlPlaneResult<Value> {
        let json_str: Option<String> = row.try_get(field_name)?;
        match json_str.as_deref().map(str::trim) {
            None | Some("") => Ok(Value::Object(Default::default())),
            Some(text) => serde_json::from_str(text).map_err(|e| {
                ControlPlaneError::InvalidTaskParams(format!("解析任务参数失败: {e}"))
            }),
        }
    }

    pub fn row_to_task(row: &SqliteRow) -> ControlPlaneResult<ScheduledTask> {
        let task_type: String = row.try_get("task_type")?;
        let params = Self::parse_params(row, "task_params")?;
        let status: String = row.try_get("status")?;
        let exec_mode: String = row.try_get("exec_mode")?;

        Ok(ScheduledTask {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            cron_expression: row.try_get("cron_expression")?,
            kind: TaskKind::from_parts(&task_type, params)?,
            status: TaskStatus::from_str(&status)?,
            exec_mode: ExecMode::from_str(&exec_mode)?,
            last_execute_time: row.try_get("last_execute_time")?,
            next_execute_time: row.try_get("next_execute_time")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    pub fn row_to_log(row: &SqliteRow) -> ControlPlaneResult<TaskExecutionLog> {
        let result_code: i64 = row.try_get("execute_result")?;

        Ok(TaskExecutionLog {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            execute_time: row.try_get("execute_time")?,
            execute_result: ExecuteResult::from_code(result_code)?,
            execute_duration: row.try_get("execute_duration")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
