use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use control_plane_core::{
    ControlPlaneResult, NewExecutionLog, TaskExecutionLog, TaskExecutionLogRepository,
};

use crate::database::mapping::MappingHelpers;

/// 只追加的执行日志仓储
pub struct SqliteTaskExecutionLogRepository {
    pool: SqlitePool,
}

impl SqliteTaskExecutionLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskExecutionLogRepository for SqliteTaskExecutionLogRepository {
    #[instrument(skip(self, entry), fields(task_id = entry.task_id))]
    async fn append_execution_log(
        &self,
        entry: &NewExecutionLog,
    ) -> ControlPlaneResult<TaskExecutionLog> {
        let row = sqlx::query(
            r#"
            INSERT INTO task_execution_logs
                (task_id, execute_time, execute_result, execute_duration, error_message, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id, task_id, execute_time, execute_result, execute_duration, error_message, created_at
            "#,
        )
        .bind(entry.task_id)
        .bind(entry.execute_time)
        .bind(entry.execute_result.code())
        .bind(entry.execute_duration)
        .bind(&entry.error_message)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        MappingHelpers::row_to_log(&row)
    }

    #[instrument(skip(self))]
    async fn list_execution_logs(
        &self,
        task_id: i64,
        limit: i64,
    ) -> ControlPlaneResult<Vec<TaskExecutionLog>> {
        let rows = sqlx::query(
            r#"
            SELECT id, task_id, execute_time, execute_result, execute_duration, error_message, created_at
            FROM task_execution_logs
            WHERE task_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(task_id)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(MappingHelpers::row_to_log).collect()
    }

    #[instrument(skip(self))]
    async fn delete_logs_before(&self, cutoff: DateTime<Utc>) -> ControlPlaneResult<u64> {
        let result = sqlx::query("DELETE FROM task_execution_logs WHERE execute_time < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        debug!("删除过期执行日志 {} 条", result.rows_affected());
        Ok(result.rows_affected())
    }
}
