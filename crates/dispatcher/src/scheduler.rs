use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use control_plane_core::{
    ControlPlaneError, ControlPlaneResult, ScheduledTask, TaskRepository, TaskStatus,
};

use crate::cron_utils::CronScheduler;
use crate::runner::TaskRunner;

/// 一个已注册的触发器
struct TriggerHandle {
    task: ScheduledTask,
    generation: u64,
    token: CancellationToken,
}

/// 重新加载结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReloadSummary {
    pub started: Vec<i64>,
    pub stopped: Vec<i64>,
    pub unchanged: Vec<i64>,
    /// 仍为启用状态但触发器注册失败的任务
    pub failed: Vec<i64>,
}

/// 同一任务的执行互斥，Drop 时释放
struct RunPermit {
    in_flight: Arc<Mutex<HashSet<i64>>>,
    task_id: i64,
}

impl RunPermit {
    fn acquire(in_flight: &Arc<Mutex<HashSet<i64>>>, task_id: i64) -> Option<Self> {
        let mut running = in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !running.insert(task_id) {
            return None;
        }
        Some(Self {
            in_flight: in_flight.clone(),
            task_id,
        })
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        let mut running = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&self.task_id);
    }
}

/// 触发器循环共享的状态
#[derive(Clone)]
struct TriggerContext {
    runner: Arc<TaskRunner>,
    triggers: Arc<RwLock<HashMap<i64, TriggerHandle>>>,
    in_flight: Arc<Mutex<HashSet<i64>>>,
    tracker: TaskTracker,
}

impl TriggerContext {
    /// 在 tracker 上启动一次执行；上一次执行尚未结束时跳过
    fn fire(&self, task: &ScheduledTask, next: Option<DateTime<Utc>>, generation: u64) {
        let Some(permit) = RunPermit::acquire(&self.in_flight, task.id) else {
            warn!(
                task_id = task.id,
                "任务上一次执行尚未结束，跳过本次触发: {}", task.name
            );
            if task.is_one_shot() {
                let ctx = self.clone();
                let task_id = task.id;
                self.tracker
                    .spawn(async move { ctx.retire(task_id, generation).await });
            }
            return;
        };

        let ctx = self.clone();
        let task = task.clone();
        self.tracker.spawn(async move {
            let _permit = permit;
            ctx.runner.run(&task, next).await;
            if task.is_one_shot() {
                ctx.retire(task.id, generation).await;
            }
        });
    }

    /// 持有注册表读锁检查取消状态后再触发
    ///
    /// 移除触发器时在写锁内取消令牌，因此 `stop_task` 返回后不会再有新的执行开始。
    async fn fire_if_active(
        &self,
        task: &ScheduledTask,
        next: Option<DateTime<Utc>>,
        generation: u64,
        token: &CancellationToken,
    ) -> bool {
        let _triggers = self.triggers.read().await;
        if token.is_cancelled() {
            return false;
        }
        self.fire(task, next, generation);
        true
    }

    /// 移除一次性任务自己的触发器，已被替换的触发器不受影响
    async fn retire(&self, task_id: i64, generation: u64) {
        let mut triggers = self.triggers.write().await;
        if triggers
            .get(&task_id)
            .is_some_and(|handle| handle.generation == generation)
        {
            triggers.remove(&task_id);
            debug!(task_id, "一次性任务触发器已移除");
        }
    }

    async fn trigger_loop(
        self,
        task: ScheduledTask,
        schedule: CronScheduler,
        token: CancellationToken,
        generation: u64,
    ) {
        let mut last_fire: Option<DateTime<Utc>> = None;

        loop {
            let now = Utc::now();
            let from = match last_fire {
                Some(last) if last > now => last,
                _ => now,
            };
            let Some(next) = schedule.next_execution_time(from) else {
                warn!(task_id = task.id, "任务没有后续执行时间: {}", task.name);
                break;
            };

            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(task_id = task.id, "触发器已取消");
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            last_fire = Some(next);
            let following = schedule.next_execution_time(next);
            if !self.fire_if_active(&task, following, generation, &token).await {
                break;
            }

            if task.is_one_shot() {
                break;
            }
        }
    }
}

/// 定时任务注册表
///
/// 维护任务ID到活跃触发器的映射，并与持久化的任务状态保持一致。
/// 读取持久化状态与修改触发器映射在同一把同步锁内完成，
/// 状态变更与触发器同步因此不会交错。锁从不跨越任务执行；
/// 触发器被移除只阻止后续触发，不会中断正在进行的执行。
pub struct TaskRegistry {
    task_repo: Arc<dyn TaskRepository>,
    ctx: TriggerContext,
    sync: AsyncMutex<()>,
    shutdown: CancellationToken,
    next_generation: AtomicU64,
}

impl TaskRegistry {
    pub fn new(task_repo: Arc<dyn TaskRepository>, runner: Arc<TaskRunner>) -> Self {
        Self {
            task_repo,
            ctx: TriggerContext {
                runner,
                triggers: Arc::new(RwLock::new(HashMap::new())),
                in_flight: Arc::new(Mutex::new(HashSet::new())),
                tracker: TaskTracker::new(),
            },
            sync: AsyncMutex::new(()),
            shutdown: CancellationToken::new(),
            next_generation: AtomicU64::new(1),
        }
    }

    /// 加载所有已启用任务并注册触发器
    ///
    /// 单个任务的cron表达式无效只记录日志并跳过，不影响其他任务。
    pub async fn start(&self) -> ControlPlaneResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(ControlPlaneError::Internal("调度器已关闭".to_string()));
        }

        let summary = self.reload_tasks().await?;
        info!(
            "调度器已启动，活跃触发器: {}",
            summary.started.len() + summary.unchanged.len()
        );
        Ok(())
    }

    /// 为任务注册触发器，已注册且定义未变时不做任何操作
    pub async fn start_task(&self, task_id: i64) -> ControlPlaneResult<()> {
        let _sync = self.sync.lock().await;
        self.start_task_locked(task_id).await
    }

    /// 移除触发器，任务未注册时不做任何操作
    pub async fn stop_task(&self, task_id: i64) -> ControlPlaneResult<()> {
        let _sync = self.sync.lock().await;
        self.remove_trigger(task_id).await;
        Ok(())
    }

    /// 持久化 enabled 状态并注册触发器
    pub async fn enable_task(&self, task_id: i64) -> ControlPlaneResult<()> {
        let _sync = self.sync.lock().await;
        self.task_repo
            .update_task_status(task_id, TaskStatus::Enabled)
            .await?;
        self.start_task_locked(task_id).await
    }

    /// 持久化 disabled 状态并移除触发器
    pub async fn disable_task(&self, task_id: i64) -> ControlPlaneResult<()> {
        let _sync = self.sync.lock().await;
        self.task_repo
            .update_task_status(task_id, TaskStatus::Disabled)
            .await?;
        self.remove_trigger(task_id).await;
        Ok(())
    }

    /// 移除触发器并删除任务记录
    pub async fn remove_task(&self, task_id: i64) -> ControlPlaneResult<()> {
        let _sync = self.sync.lock().await;
        self.remove_trigger(task_id).await;
        self.task_repo.delete_task(task_id).await
    }

    async fn start_task_locked(&self, task_id: i64) -> ControlPlaneResult<()> {
        let task = self
            .task_repo
            .get_task(task_id)
            .await?
            .ok_or(ControlPlaneError::TaskNotFound { id: task_id })?;

        if !task.is_enabled() {
            return Err(ControlPlaneError::ValidationError(format!(
                "任务 {} 未启用，当前状态: {}",
                task_id, task.status
            )));
        }

        let mut triggers = self.ctx.triggers.write().await;
        if triggers
            .get(&task_id)
            .is_some_and(|existing| existing.task.same_definition(&task))
        {
            debug!(task_id, "任务触发器已存在");
            return Ok(());
        }

        // 新定义无法注册时旧触发器也要移除，任务回到未注册状态
        let armed = self.arm(task);
        if let Some(previous) = triggers.remove(&task_id) {
            previous.token.cancel();
            info!(task_id, "任务定义已变更，旧触发器已移除");
        }

        triggers.insert(task_id, armed?);
        info!(task_id, "任务触发器已注册");
        Ok(())
    }

    /// 令牌在写锁内取消
    async fn remove_trigger(&self, task_id: i64) {
        let mut triggers = self.ctx.triggers.write().await;
        match triggers.remove(&task_id) {
            Some(handle) => {
                handle.token.cancel();
                info!(task_id, "任务触发器已移除");
            }
            None => debug!(task_id, "任务未注册触发器，无需停止"),
        }
    }

    /// 按持久化状态重新同步触发器集合
    ///
    /// 不再启用或定义已变更的触发器被停止，新启用的任务被注册，
    /// 其余触发器保持不动，不会重置下一次触发时间的计算。
    pub async fn reload_tasks(&self) -> ControlPlaneResult<ReloadSummary> {
        let _sync = self.sync.lock().await;
        let tasks = self.task_repo.list_enabled_tasks().await?;
        let desired: HashMap<i64, ScheduledTask> =
            tasks.into_iter().map(|task| (task.id, task)).collect();

        let mut summary = ReloadSummary::default();
        let mut triggers = self.ctx.triggers.write().await;

        let stale: Vec<i64> = triggers
            .iter()
            .filter(|(id, handle)| {
                desired
                    .get(id)
                    .map_or(true, |task| !task.same_definition(&handle.task))
            })
            .map(|(id, _)| *id)
            .collect();

        for task_id in stale {
            if let Some(handle) = triggers.remove(&task_id) {
                handle.token.cancel();
                if !desired.contains_key(&task_id) {
                    summary.stopped.push(task_id);
                }
            }
        }

        for (task_id, task) in desired {
            if triggers.contains_key(&task_id) {
                summary.unchanged.push(task_id);
                continue;
            }
            match self.arm(task) {
                Ok(handle) => {
                    triggers.insert(task_id, handle);
                    summary.started.push(task_id);
                }
                Err(e) => {
                    warn!(task_id, "注册任务触发器失败，已跳过: {}", e);
                    summary.failed.push(task_id);
                }
            }
        }

        summary.started.sort_unstable();
        summary.stopped.sort_unstable();
        summary.unchanged.sort_unstable();
        summary.failed.sort_unstable();

        info!(
            started = summary.started.len(),
            stopped = summary.stopped.len(),
            unchanged = summary.unchanged.len(),
            failed = summary.failed.len(),
            "任务重新加载完成"
        );
        Ok(summary)
    }

    pub async fn is_task_active(&self, task_id: i64) -> bool {
        self.ctx.triggers.read().await.contains_key(&task_id)
    }

    pub async fn active_task_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.ctx.triggers.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// 正在执行的任务数
    pub fn in_flight_count(&self) -> usize {
        self.ctx.tracker.len()
    }

    /// 移除所有触发器
    pub async fn stop_all(&self) {
        let mut triggers = self.ctx.triggers.write().await;
        for (_, handle) in triggers.drain() {
            handle.token.cancel();
        }
        info!("所有任务触发器已移除");
    }

    /// 停止调度并等待正在进行的执行，最多等待 `grace`
    ///
    /// 返回 `true` 表示所有执行都在等待时间内结束。
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.stop_all().await;
        self.shutdown.cancel();
        self.ctx.tracker.close();

        let in_flight = self.ctx.tracker.len();
        if in_flight > 0 {
            info!("等待 {} 个正在执行的任务结束", in_flight);
        }

        match tokio::time::timeout(grace, self.ctx.tracker.wait()).await {
            Ok(()) => {
                info!("调度器已关闭");
                true
            }
            Err(_) => {
                warn!(
                    "等待超时，仍有 {} 个任务在执行",
                    self.ctx.tracker.len()
                );
                false
            }
        }
    }

    fn arm(&self, task: ScheduledTask) -> ControlPlaneResult<TriggerHandle> {
        let schedule = CronScheduler::new(&task.cron_expression)?;
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let token = self.shutdown.child_token();

        tokio::spawn(self.ctx.clone().trigger_loop(
            task.clone(),
            schedule,
            token.clone(),
            generation,
        ));

        Ok(TriggerHandle {
            task,
            generation,
            token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use control_plane_testing_utils::{
        MockExecutionLogRepository, MockTaskExecutor, MockTaskRepository, TaskBuilder,
    };

    fn registry_with(executor: Arc<MockTaskExecutor>) -> TaskRegistry {
        let task_repo = Arc::new(MockTaskRepository::new());
        let runner = Arc::new(TaskRunner::new(
            executor,
            task_repo.clone(),
            Arc::new(MockExecutionLogRepository::new()),
        ));
        TaskRegistry::new(task_repo, runner)
    }

    #[tokio::test]
    async fn test_cancelled_trigger_does_not_fire() {
        let executor = Arc::new(MockTaskExecutor::new());
        let registry = registry_with(executor.clone());
        let task = TaskBuilder::new().with_id(1).build();

        let token = CancellationToken::new();
        token.cancel();
        assert!(!registry.ctx.fire_if_active(&task, None, 1, &token).await);

        registry.ctx.tracker.close();
        registry.ctx.tracker.wait().await;
        assert_eq!(executor.call_count(1), 0);
    }

    #[tokio::test]
    async fn test_active_trigger_fires_once() {
        let executor = Arc::new(MockTaskExecutor::new());
        let registry = registry_with(executor.clone());
        let task = TaskBuilder::new().with_id(1).build();

        let token = CancellationToken::new();
        assert!(registry.ctx.fire_if_active(&task, None, 1, &token).await);

        registry.ctx.tracker.close();
        registry.ctx.tracker.wait().await;
        assert_eq!(executor.call_count(1), 1);
    }
}
