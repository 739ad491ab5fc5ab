use anyhow::Result;
use chrono::{Duration, Utc};
use serde_json::json;

use control_plane_core::{
    ControlPlaneError, ExecMode, ExecuteResult, FunctionParams, NewExecutionLog, NewTask,
    ShellParams, TaskExecutionLogRepository, TaskKind, TaskRepository, TaskStatus,
};
use control_plane_infrastructure::{
    DatabaseManager, SqliteTaskExecutionLogRepository, SqliteTaskRepository,
};

fn shell_task(name: &str) -> NewTask {
    NewTask {
        name: name.to_string(),
        description: "nightly backup".to_string(),
        cron_expression: "0 3 * * *".to_string(),
        kind: TaskKind::Shell(ShellParams {
            command: "echo backup".to_string(),
            timeout: Some(60),
            ..ShellParams::default()
        }),
        exec_mode: ExecMode::Recurring,
    }
}

#[tokio::test]
async fn test_sqlite_task_repository_crud() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let repo = SqliteTaskRepository::new(db.pool().clone());

    let created = repo.create_task(&shell_task("backup")).await?;
    assert!(created.id > 0);
    assert_eq!(created.status, TaskStatus::Disabled);
    assert_eq!(created.kind.task_type(), "shell");

    let fetched = repo.get_task(created.id).await?.expect("任务应存在");
    assert_eq!(fetched, created);

    assert!(repo.list_enabled_tasks().await?.is_empty());
    repo.update_task_status(created.id, TaskStatus::Enabled)
        .await?;
    let enabled = repo.list_enabled_tasks().await?;
    assert_eq!(enabled.len(), 1);
    assert_eq!(enabled[0].id, created.id);

    repo.delete_task(created.id).await?;
    assert!(repo.get_task(created.id).await?.is_none());
    assert!(repo.list_tasks().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_missing_task_reports_not_found() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let repo = SqliteTaskRepository::new(db.pool().clone());

    assert!(repo.get_task(404).await?.is_none());
    assert!(matches!(
        repo.update_task_status(404, TaskStatus::Enabled).await,
        Err(ControlPlaneError::TaskNotFound { id: 404 })
    ));
    assert!(matches!(
        repo.delete_task(404).await,
        Err(ControlPlaneError::TaskNotFound { id: 404 })
    ));
    assert!(matches!(
        repo.record_execution(404, Utc::now(), None).await,
        Err(ControlPlaneError::TaskNotFound { id: 404 })
    ));
    Ok(())
}

#[tokio::test]
async fn test_record_execution_times() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let repo = SqliteTaskRepository::new(db.pool().clone());
    let task = repo.create_task(&shell_task("report")).await?;

    let last = Utc::now();
    let next = last + Duration::hours(1);
    repo.record_execution(task.id, last, Some(next)).await?;

    let task = repo.get_task(task.id).await?.expect("任务应存在");
    assert_eq!(
        task.last_execute_time.map(|t| t.timestamp_millis()),
        Some(last.timestamp_millis())
    );
    assert_eq!(
        task.next_execute_time.map(|t| t.timestamp_millis()),
        Some(next.timestamp_millis())
    );
    Ok(())
}

#[tokio::test]
async fn test_undecodable_rows_are_skipped() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let repo = SqliteTaskRepository::new(db.pool().clone());

    let good = repo
        .create_task(&NewTask {
            name: "cleanup".to_string(),
            description: String::new(),
            cron_expression: "0 0 2 * * *".to_string(),
            kind: TaskKind::Function(FunctionParams {
                function_name: "clean_up_old_data".to_string(),
                params: json!({"retention_days": 7}),
            }),
            exec_mode: ExecMode::OneTime,
        })
        .await?;
    repo.update_task_status(good.id, TaskStatus::Enabled).await?;

    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO scheduled_tasks
            (name, cron_expression, task_type, task_params, status, exec_mode, created_at, updated_at)
        VALUES ('legacy', '* * * * *', 'python', '{}', 'enabled', 'recurring', ?, ?)
        "#,
    )
    .bind(now)
    .bind(now)
    .execute(db.pool())
    .await?;

    let enabled = repo.list_enabled_tasks().await?;
    assert_eq!(enabled.len(), 1);
    assert_eq!(enabled[0].id, good.id);
    assert_eq!(enabled[0].exec_mode, ExecMode::OneTime);
    Ok(())
}

#[tokio::test]
async fn test_execution_log_append_and_list() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let repo = SqliteTaskExecutionLogRepository::new(db.pool().clone());
    let start = Utc::now();

    for i in 0..5 {
        let entry = if i % 2 == 0 {
            NewExecutionLog::success(1, start + Duration::seconds(i), 10 + i)
        } else {
            NewExecutionLog::failure(1, start + Duration::seconds(i), 3, "exit status 1")
        };
        repo.append_execution_log(&entry).await?;
    }
    repo.append_execution_log(&NewExecutionLog::success(2, start, 1))
        .await?;

    let logs = repo.list_execution_logs(1, 3).await?;
    assert_eq!(logs.len(), 3);
    assert!(logs.windows(2).all(|w| w[0].id > w[1].id));
    assert!(logs.iter().all(|log| log.task_id == 1));
    assert_eq!(logs[0].execute_result, ExecuteResult::Success);
    assert_eq!(logs[1].execute_result, ExecuteResult::Failure);
    assert_eq!(logs[1].error_message, "exit status 1");

    assert!(repo.list_execution_logs(99, 10).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_logs_survive_task_deletion_and_retention() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let tasks = SqliteTaskRepository::new(db.pool().clone());
    let logs = SqliteTaskExecutionLogRepository::new(db.pool().clone());

    let task = tasks.create_task(&shell_task("temp")).await?;
    let old = Utc::now() - Duration::days(40);
    logs.append_execution_log(&NewExecutionLog::success(task.id, old, 5))
        .await?;
    logs.append_execution_log(&NewExecutionLog::success(task.id, Utc::now(), 5))
        .await?;

    tasks.delete_task(task.id).await?;
    assert_eq!(logs.list_execution_logs(task.id, 10).await?.len(), 2);

    let deleted = logs
        .delete_logs_before(Utc::now() - Duration::days(30))
        .await?;
    assert_eq!(deleted, 1);
    assert_eq!(logs.list_execution_logs(task.id, 10).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_migrations_are_repeatable() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    db.run_migrations().await?;
    db.health_check().await?;
    db.close().await;
    Ok(())
}
