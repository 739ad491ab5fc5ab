use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use control_plane_core::{
    ControlPlaneError, ControlPlaneResult, NewTask, ScheduledTask, TaskControlService,
    TaskRepository, TaskStatus,
};

use crate::cron_utils::CronScheduler;
use crate::executors::validate_task_kind;
use crate::scheduler::TaskRegistry;

/// 任务控制器
///
/// 管理接口对调度器的唯一变更入口：持久化状态与同步触发器在注册表的同步锁内完成。
/// 没有本地注册表时（仅API模式）只持久化状态，由调度进程在重新加载时同步。
pub struct TaskController {
    task_repo: Arc<dyn TaskRepository>,
    registry: Option<Arc<TaskRegistry>>,
}

impl TaskController {
    pub fn new(task_repo: Arc<dyn TaskRepository>, registry: Arc<TaskRegistry>) -> Self {
        Self {
            task_repo,
            registry: Some(registry),
        }
    }

    pub fn detached(task_repo: Arc<dyn TaskRepository>) -> Self {
        Self {
            task_repo,
            registry: None,
        }
    }

    async fn require_task(&self, task_id: i64) -> ControlPlaneResult<ScheduledTask> {
        self.task_repo
            .get_task(task_id)
            .await?
            .ok_or(ControlPlaneError::TaskNotFound { id: task_id })
    }
}

#[async_trait]
impl TaskControlService for TaskController {
    async fn enable_task(&self, task_id: i64) -> ControlPlaneResult<()> {
        let task = self.require_task(task_id).await?;
        CronScheduler::validate_cron_expression(&task.cron_expression)?;
        validate_task_kind(&task.kind, &task.description)?;

        match &self.registry {
            Some(registry) => {
                registry.enable_task(task_id).await?;
                info!(task_id, "任务已启用: {}", task.name);
                Ok(())
            }
            None => {
                self.task_repo
                    .update_task_status(task_id, TaskStatus::Enabled)
                    .await?;
                info!(task_id, "任务已启用: {}", task.name);
                warn!(task_id, "本进程未运行调度器，触发器将在调度器重新加载时注册");
                Ok(())
            }
        }
    }

    async fn disable_task(&self, task_id: i64) -> ControlPlaneResult<()> {
        match &self.registry {
            Some(registry) => registry.disable_task(task_id).await?,
            None => {
                self.task_repo
                    .update_task_status(task_id, TaskStatus::Disabled)
                    .await?
            }
        }
        info!(task_id, "任务已禁用");
        Ok(())
    }

    async fn reload_tasks(&self) -> ControlPlaneResult<()> {
        match &self.registry {
            Some(registry) => registry.reload_tasks().await.map(|_| ()),
            None => Err(ControlPlaneError::ValidationError(
                "本进程未运行调度器，无法重新加载任务".to_string(),
            )),
        }
    }

    async fn create_task(&self, task: NewTask) -> ControlPlaneResult<ScheduledTask> {
        if task.name.trim().is_empty() {
            return Err(ControlPlaneError::ValidationError(
                "任务名称不能为空".to_string(),
            ));
        }
        CronScheduler::validate_cron_expression(&task.cron_expression)?;
        validate_task_kind(&task.kind, &task.description)?;

        let created = self.task_repo.create_task(&task).await?;
        info!(task_id = created.id, "任务已创建: {}", created.name);
        Ok(created)
    }

    async fn delete_task(&self, task_id: i64) -> ControlPlaneResult<()> {
        match &self.registry {
            Some(registry) => registry.remove_task(task_id).await?,
            None => self.task_repo.delete_task(task_id).await?,
        }
        info!(task_id, "任务已删除");
        Ok(())
    }

    async fn is_task_active(&self, task_id: i64) -> bool {
        match &self.registry {
            Some(registry) => registry.is_task_active(task_id).await,
            None => false,
        }
    }

    async fn active_task_ids(&self) -> Vec<i64> {
        match &self.registry {
            Some(registry) => registry.active_task_ids().await,
            None => Vec::new(),
        }
    }
}
