use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, instrument, warn};

use control_plane_core::{
    ControlPlaneError, ControlPlaneResult, NewTask, ScheduledTask, TaskRepository, TaskStatus,
};

use crate::database::mapping::MappingHelpers;

const TASK_COLUMNS: &str = "id, name, description, cron_expression, task_type, task_params, \
     status, exec_mode, last_execute_time, next_execute_time, created_at, updated_at";

pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    #[instrument(skip(self))]
    async fn get_task(&self, id: i64) -> ControlPlaneResult<Option<ScheduledTask>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(MappingHelpers::row_to_task).transpose()
    }

    /// 解析失败的行只记录警告并跳过，不影响其他任务加载
    #[instrument(skip(self))]
    async fn list_enabled_tasks(&self) -> ControlPlaneResult<Vec<ScheduledTask>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE status = ? ORDER BY id"
        ))
        .bind(TaskStatus::Enabled.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in &rows {
            match MappingHelpers::row_to_task(row) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!("跳过无法解析的任务记录: {}", e),
            }
        }

        debug!("加载已启用任务 {} 个", tasks.len());
        Ok(tasks)
    }

    #[instrument(skip(self))]
    async fn update_task_status(&self, id: i64, status: TaskStatus) -> ControlPlaneResult<()> {
        let result = sqlx::query(
            "UPDATE scheduled_tasks SET status = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ControlPlaneError::TaskNotFound { id });
        }
        Ok(())
    }

    #[instrument(skip(self, task), fields(task_name = %task.name))]
    async fn create_task(&self, task: &NewTask) -> ControlPlaneResult<ScheduledTask> {
        let params = serde_json::to_string(&task.kind.params_json()?)?;
        let now = Utc::now();

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO scheduled_tasks
                (name, description, cron_expression, task_type, task_params, status, exec_mode, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(&task.name)
        .bind(&task.description)
        .bind(&task.cron_expression)
        .bind(task.kind.task_type())
        .bind(params)
        .bind(TaskStatus::Disabled.as_str())
        .bind(task.exec_mode.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        MappingHelpers::row_to_task(&row)
    }

    #[instrument(skip(self))]
    async fn list_tasks(&self) -> ControlPlaneResult<Vec<ScheduledTask>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM scheduled_tasks ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(MappingHelpers::row_to_task).collect()
    }

    #[instrument(skip(self))]
    async fn delete_task(&self, id: i64) -> ControlPlaneResult<()> {
        let result = sqlx::query("DELETE FROM scheduled_tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ControlPlaneError::TaskNotFound { id });
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn record_execution(
        &self,
        id: i64,
        last_execute_time: DateTime<Utc>,
        next_execute_time: Option<DateTime<Utc>>,
    ) -> ControlPlaneResult<()> {
        let result = sqlx::query(
            "UPDATE scheduled_tasks SET last_execute_time = ?, next_execute_time = ?, updated_at = ? WHERE id = ?",
        )
        .bind(last_execute_time)
        .bind(next_execute_time)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ControlPlaneError::TaskNotFound { id });
        }
        Ok(())
    }
}
