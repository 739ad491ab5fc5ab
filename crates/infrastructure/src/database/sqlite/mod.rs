pub mod sqlite_execution_log_repository;
pub mod sqlite_task_repository;

pub use sqlite_execution_log_repository::SqliteTaskExecutionLogRepository;
pub use sqlite_task_repository::SqliteTaskRepository;

use anyhow::{Context, Result};
use control_plane_core::config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// SQLite连接池与表结构管理
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str(&config.url)
            .with_context(|| format!("无效的数据库URL: {}", config.url))?
            .create_if_missing(true);

        // 内存数据库的每个连接都是独立的库，只能使用单连接且不能回收
        let in_memory = config.url.contains(":memory:");
        let mut options = SqlitePoolOptions::new()
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds));
        options = if in_memory {
            options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            options
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
                .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
                .max_lifetime(Duration::from_secs(1800))
        };

        let pool = options
            .connect_with(connect_options)
            .await
            .context("连接数据库失败")?;

        info!("数据库连接池已创建: {}", config.url);
        Ok(Self { pool })
    }

    /// 创建已完成建表的内存数据库，用于测试和本地试用
    pub async fn in_memory() -> Result<Self> {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        };
        let manager = Self::new(&config).await?;
        manager.run_migrations().await?;
        Ok(manager)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 建表，可重复执行
    pub async fn run_migrations(&self) -> Result<()> {
        debug!("执行数据库迁移");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scheduled_tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                cron_expression TEXT NOT NULL,
                task_type TEXT NOT NULL,
                task_params TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'disabled',
                exec_mode TEXT NOT NULL DEFAULT 'recurring',
                last_execute_time DATETIME,
                next_execute_time DATETIME,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("创建任务表失败")?;

        // 日志只引用任务ID，任务删除后日志仍然保留
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_execution_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL,
                execute_time DATETIME NOT NULL,
                execute_result INTEGER NOT NULL,
                execute_duration INTEGER,
                error_message TEXT NOT NULL DEFAULT '',
                created_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("创建执行日志表失败")?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_status ON scheduled_tasks(status)",
            "CREATE INDEX IF NOT EXISTS idx_task_execution_logs_task_id ON task_execution_logs(task_id, id)",
            "CREATE INDEX IF NOT EXISTS idx_task_execution_logs_execute_time ON task_execution_logs(execute_time)",
        ];
        for index in indexes {
            sqlx::query(index)
                .execute(&self.pool)
                .await
                .context("创建索引失败")?;
        }

        info!("数据库迁移完成");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
