#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use tokio::sync::Notify;

    use control_plane_core::{
        ControlPlaneError, ControlPlaneResult, ExecMode, FunctionParams, NewTask, ScheduledTask,
        ShellParams, TaskControlService, TaskKind, TaskRepository, TaskStatus,
    };
    use control_plane_dispatcher::{TaskController, TaskRegistry, TaskRunner};
    use control_plane_testing_utils::{
        MockExecutionLogRepository, MockTaskExecutor, MockTaskRepository, TaskBuilder, TestEnv,
    };
    use serde_json::json;

    fn setup(
        tasks: Vec<control_plane_core::ScheduledTask>,
    ) -> (
        Arc<MockTaskRepository>,
        Arc<MockExecutionLogRepository>,
        Arc<TaskRegistry>,
        TaskController,
    ) {
        let task_repo = Arc::new(MockTaskRepository::with_tasks(tasks));
        let log_repo = Arc::new(MockExecutionLogRepository::new());
        let runner = Arc::new(TaskRunner::new(
            Arc::new(MockTaskExecutor::new()),
            task_repo.clone(),
            log_repo.clone(),
        ));
        let registry = Arc::new(TaskRegistry::new(task_repo.clone(), runner));
        let controller = TaskController::new(task_repo.clone(), registry.clone());
        (task_repo, log_repo, registry, controller)
    }

    fn new_task(cron: &str) -> NewTask {
        NewTask {
            name: "cleanup".to_string(),
            description: String::new(),
            cron_expression: cron.to_string(),
            kind: TaskKind::Function(FunctionParams {
                function_name: "clean_up_old_data".to_string(),
                params: json!({"retention_days": 7}),
            }),
            exec_mode: ExecMode::Recurring,
        }
    }

    #[tokio::test]
    async fn test_create_task_is_disabled_and_unscheduled() {
        let (task_repo, _, registry, controller) = setup(vec![]);

        let created = controller.create_task(new_task("0 */5 * * *")).await.unwrap();

        assert_eq!(created.status, TaskStatus::Disabled);
        assert_eq!(task_repo.count(), 1);
        assert!(!registry.is_task_active(created.id).await);
    }

    #[tokio::test]
    async fn test_create_task_validation() {
        let (task_repo, _, _, controller) = setup(vec![]);

        let err = controller.create_task(new_task("bogus")).await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::InvalidCron { .. }));

        let mut unnamed = new_task("0 0 * * *");
        unnamed.name = " ".to_string();
        let err = controller.create_task(unnamed).await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::ValidationError(_)));

        let mut shell = new_task("0 0 * * *");
        shell.kind = TaskKind::Shell(ShellParams::default());
        let err = controller.create_task(shell).await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::InvalidTaskParams(_)));

        assert_eq!(task_repo.count(), 0);
    }

    #[tokio::test]
    async fn test_enable_then_disable_cycle() {
        let (task_repo, log_repo, registry, controller) =
            setup(vec![TaskBuilder::new().with_id(1).disabled().build()]);

        controller.enable_task(1).await.unwrap();
        assert_eq!(task_repo.snapshot(1).unwrap().status, TaskStatus::Enabled);
        assert!(controller.is_task_active(1).await);

        let logs = log_repo.clone();
        assert!(
            TestEnv::wait_for(
                || {
                    let logs = logs.clone();
                    async move { logs.logs_for(1).len() == 1 }
                },
                Duration::from_secs(3),
            )
            .await
        );

        controller.disable_task(1).await.unwrap();
        assert_eq!(task_repo.snapshot(1).unwrap().status, TaskStatus::Disabled);
        assert!(!registry.is_task_active(1).await);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let count = log_repo.logs_for(1).len();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(log_repo.logs_for(1).len(), count);
    }

    #[tokio::test]
    async fn test_disabled_tasks_never_hold_triggers() {
        let (task_repo, _, _, controller) = setup(vec![
            TaskBuilder::new().with_id(1).with_cron("0 0 * * *").disabled().build(),
            TaskBuilder::new().with_id(2).with_cron("0 0 * * *").disabled().build(),
            TaskBuilder::new().with_id(3).with_cron("0 0 * * *").build(),
        ]);

        controller.reload_tasks().await.unwrap();
        controller.enable_task(1).await.unwrap();
        controller.disable_task(3).await.unwrap();
        controller.enable_task(2).await.unwrap();
        controller.disable_task(2).await.unwrap();
        controller.reload_tasks().await.unwrap();

        for task in task_repo.list_tasks().await.unwrap() {
            if task.status != TaskStatus::Enabled {
                assert!(!controller.is_task_active(task.id).await);
            }
        }
        assert_eq!(controller.active_task_ids().await, vec![1]);
    }

    #[tokio::test]
    async fn test_unknown_task_errors() {
        let (_, _, _, controller) = setup(vec![]);

        assert!(matches!(
            controller.enable_task(5).await,
            Err(ControlPlaneError::TaskNotFound { id: 5 })
        ));
        assert!(matches!(
            controller.disable_task(5).await,
            Err(ControlPlaneError::TaskNotFound { id: 5 })
        ));
        assert!(matches!(
            controller.delete_task(5).await,
            Err(ControlPlaneError::TaskNotFound { id: 5 })
        ));
    }

    #[tokio::test]
    async fn test_delete_stops_trigger_then_removes_record() {
        let (task_repo, _, registry, controller) =
            setup(vec![TaskBuilder::new().with_id(1).with_cron("0 0 * * *").build()]);
        registry.start().await.unwrap();
        assert!(registry.is_task_active(1).await);

        controller.delete_task(1).await.unwrap();

        assert!(!registry.is_task_active(1).await);
        assert!(task_repo.get_task(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_detached_controller_only_persists() {
        let task_repo = Arc::new(MockTaskRepository::with_tasks(vec![TaskBuilder::new()
            .with_id(1)
            .disabled()
            .build()]));
        let controller = TaskController::detached(task_repo.clone());

        controller.enable_task(1).await.unwrap();
        assert_eq!(task_repo.snapshot(1).unwrap().status, TaskStatus::Enabled);
        assert!(!controller.is_task_active(1).await);
        assert!(controller.reload_tasks().await.is_err());
    }

    /// 在 list_enabled_tasks 取得快照后暂停，直到测试放行
    struct GatedTaskRepository {
        inner: Arc<MockTaskRepository>,
        armed: AtomicBool,
        paused: Notify,
        release: Notify,
    }

    impl GatedTaskRepository {
        fn new(inner: Arc<MockTaskRepository>) -> Self {
            Self {
                inner,
                armed: AtomicBool::new(true),
                paused: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl TaskRepository for GatedTaskRepository {
        async fn get_task(&self, id: i64) -> ControlPlaneResult<Option<ScheduledTask>> {
            self.inner.get_task(id).await
        }

        async fn list_enabled_tasks(&self) -> ControlPlaneResult<Vec<ScheduledTask>> {
            let tasks = self.inner.list_enabled_tasks().await?;
            if self.armed.swap(false, Ordering::SeqCst) {
                self.paused.notify_one();
                self.release.notified().await;
            }
            Ok(tasks)
        }

        async fn update_task_status(&self, id: i64, status: TaskStatus) -> ControlPlaneResult<()> {
            self.inner.update_task_status(id, status).await
        }

        async fn create_task(&self, task: &NewTask) -> ControlPlaneResult<ScheduledTask> {
            self.inner.create_task(task).await
        }

        async fn list_tasks(&self) -> ControlPlaneResult<Vec<ScheduledTask>> {
            self.inner.list_tasks().await
        }

        async fn delete_task(&self, id: i64) -> ControlPlaneResult<()> {
            self.inner.delete_task(id).await
        }

        async fn record_execution(
            &self,
            id: i64,
            last_execute_time: DateTime<Utc>,
            next_execute_time: Option<DateTime<Utc>>,
        ) -> ControlPlaneResult<()> {
            self.inner
                .record_execution(id, last_execute_time, next_execute_time)
                .await
        }
    }

    #[tokio::test]
    async fn test_disable_during_reload_leaves_no_trigger() {
        let inner = Arc::new(MockTaskRepository::with_tasks(vec![TaskBuilder::new()
            .with_id(1)
            .with_cron("0 0 * * *")
            .build()]));
        let gated = Arc::new(GatedTaskRepository::new(inner.clone()));
        let runner = Arc::new(TaskRunner::new(
            Arc::new(MockTaskExecutor::new()),
            gated.clone(),
            Arc::new(MockExecutionLogRepository::new()),
        ));
        let registry = Arc::new(TaskRegistry::new(gated.clone(), runner));
        let controller = Arc::new(TaskController::new(gated.clone(), registry.clone()));

        let reload = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.reload_tasks().await })
        };
        gated.paused.notified().await;

        let disable = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.disable_task(1).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        gated.release.notify_one();

        reload.await.unwrap().unwrap();
        disable.await.unwrap().unwrap();

        assert_eq!(inner.snapshot(1).unwrap().status, TaskStatus::Disabled);
        assert!(!registry.is_task_active(1).await);
    }

    #[tokio::test]
    async fn test_enable_and_disable_race_stays_consistent() {
        let (task_repo, _, registry, controller) = setup(vec![TaskBuilder::new()
            .with_id(1)
            .with_cron("0 0 * * *")
            .disabled()
            .build()]);
        let controller = Arc::new(controller);

        for _ in 0..20 {
            let enable = {
                let controller = controller.clone();
                tokio::spawn(async move { controller.enable_task(1).await })
            };
            let disable = {
                let controller = controller.clone();
                tokio::spawn(async move { controller.disable_task(1).await })
            };
            let _ = enable.await.unwrap();
            disable.await.unwrap().unwrap();

            let enabled = task_repo.snapshot(1).unwrap().status == TaskStatus::Enabled;
            assert_eq!(registry.is_task_active(1).await, enabled);
        }
    }
}
