use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use control_plane_core::{
    ExecuteResult, ExecutionLogNotifier, NewExecutionLog, ScheduledTask, TaskExecutionLog,
    TaskExecutionLogRepository, TaskExecutor, TaskRepository, TaskStatus,
};

/// 任务运行器
///
/// 执行任务的一次触发并写入一条执行日志。执行器返回的错误和panic
/// 都被转换为失败日志，不会传播给调度器。
pub struct TaskRunner {
    executor: Arc<dyn TaskExecutor>,
    task_repo: Arc<dyn TaskRepository>,
    log_repo: Arc<dyn TaskExecutionLogRepository>,
    notifier: Option<Arc<dyn ExecutionLogNotifier>>,
}

impl TaskRunner {
    pub fn new(
        executor: Arc<dyn TaskExecutor>,
        task_repo: Arc<dyn TaskRepository>,
        log_repo: Arc<dyn TaskExecutionLogRepository>,
    ) -> Self {
        Self {
            executor,
            task_repo,
            log_repo,
            notifier: None,
        }
    }

    /// 设置日志写入后的通知对象
    pub fn with_notifier(mut self, notifier: Arc<dyn ExecutionLogNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// 执行一次任务
    ///
    /// `next_execute_time` 是触发器计算出的下一次触发时间，随执行记录一起持久化。
    /// 返回写入的日志；日志写入失败时返回 `None`。
    pub async fn run(
        &self,
        task: &ScheduledTask,
        next_execute_time: Option<DateTime<Utc>>,
    ) -> Option<TaskExecutionLog> {
        let execute_time = Utc::now();
        let started = Instant::now();

        debug!(task_id = task.id, "开始执行任务: {}", task.name);

        let outcome = AssertUnwindSafe(self.executor.execute(task))
            .catch_unwind()
            .await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let entry = match outcome {
            Ok(Ok(())) => {
                info!(
                    task_id = task.id,
                    duration_ms, "任务执行成功: {}", task.name
                );
                NewExecutionLog::success(task.id, execute_time, duration_ms)
            }
            Ok(Err(e)) => {
                warn!(
                    task_id = task.id,
                    duration_ms, "任务执行失败: {} - {}", task.name, e
                );
                NewExecutionLog::failure(task.id, execute_time, duration_ms, e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(task_id = task.id, "任务执行发生panic: {} - {}", task.name, message);
                NewExecutionLog::failure(
                    task.id,
                    execute_time,
                    duration_ms,
                    format!("任务执行发生panic: {message}"),
                )
            }
        };

        let succeeded = entry.execute_result == ExecuteResult::Success;

        let log = match self.log_repo.append_execution_log(&entry).await {
            Ok(log) => Some(log),
            Err(e) => {
                error!(task_id = task.id, "写入执行日志失败: {}", e);
                None
            }
        };

        let next = if task.is_one_shot() {
            None
        } else {
            next_execute_time
        };
        if let Err(e) = self
            .task_repo
            .record_execution(task.id, execute_time, next)
            .await
        {
            warn!(task_id = task.id, "更新任务执行时间失败: {}", e);
        }

        if task.is_one_shot() && succeeded {
            match self
                .task_repo
                .update_task_status(task.id, TaskStatus::Completed)
                .await
            {
                Ok(()) => info!(task_id = task.id, "一次性任务已完成: {}", task.name),
                Err(e) => warn!(task_id = task.id, "标记一次性任务完成失败: {}", e),
            }
        }

        if let (Some(log), Some(notifier)) = (&log, &self.notifier) {
            notifier.notify_log(task.id, log).await;
        }

        log
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "未知错误".to_string()
    }
}
