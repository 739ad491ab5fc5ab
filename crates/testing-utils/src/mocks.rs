//! 仓储与服务接口的内存Mock实现
//!
//! 用于单元测试和集成测试，无需真实数据库或消息代理。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use control_plane_core::{
    ApplicationEvent, ControlPlaneError, ControlPlaneResult, EventHandler, ExecutionLogNotifier,
    NewExecutionLog, NewTask, ScheduledTask, TaskExecutionLog, TaskExecutionLogRepository,
    TaskExecutor, TaskRepository, TaskStatus,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// TaskRepository 的内存实现
#[derive(Debug, Clone)]
pub struct MockTaskRepository {
    tasks: Arc<Mutex<HashMap<i64, ScheduledTask>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockTaskRepository {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub fn with_tasks(tasks: Vec<ScheduledTask>) -> Self {
        let mut task_map = HashMap::new();
        let mut max_id = 0;

        for task in tasks {
            if task.id > max_id {
                max_id = task.id;
            }
            task_map.insert(task.id, task);
        }

        Self {
            tasks: Arc::new(Mutex::new(task_map)),
            next_id: Arc::new(Mutex::new(max_id + 1)),
        }
    }

    /// 直接写入任务，绕过状态变更逻辑，模拟外部修改
    pub fn upsert(&self, task: ScheduledTask) {
        self.tasks.lock().unwrap().insert(task.id, task);
    }

    /// 仅修改持久化状态，不经过调度器
    pub fn set_status(&self, id: i64, status: TaskStatus) {
        if let Some(task) = self.tasks.lock().unwrap().get_mut(&id) {
            task.status = status;
        }
    }

    pub fn snapshot(&self, id: i64) -> Option<ScheduledTask> {
        self.tasks.lock().unwrap().get(&id).cloned()
    }

    pub fn count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

impl Default for MockTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for MockTaskRepository {
    async fn get_task(&self, id: i64) -> ControlPlaneResult<Option<ScheduledTask>> {
        Ok(self.tasks.lock().unwrap().get(&id).cloned())
    }

    async fn list_enabled_tasks(&self) -> ControlPlaneResult<Vec<ScheduledTask>> {
        let mut tasks: Vec<ScheduledTask> = self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|task| task.is_enabled())
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.id);
        Ok(tasks)
    }

    async fn update_task_status(&self, id: i64, status: TaskStatus) -> ControlPlaneResult<()> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(&id)
            .ok_or(ControlPlaneError::TaskNotFound { id })?;
        task.status = status;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn create_task(&self, task: &NewTask) -> ControlPlaneResult<ScheduledTask> {
        let mut tasks = self.tasks.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let now = Utc::now();
        let created = ScheduledTask {
            id: *next_id,
            name: task.name.clone(),
            description: task.description.clone(),
            cron_expression: task.cron_expression.clone(),
            kind: task.kind.clone(),
            status: TaskStatus::Disabled,
            exec_mode: task.exec_mode,
            last_execute_time: None,
            next_execute_time: None,
            created_at: now,
            updated_at: now,
        };
        *next_id += 1;

        tasks.insert(created.id, created.clone());
        Ok(created)
    }

    async fn list_tasks(&self) -> ControlPlaneResult<Vec<ScheduledTask>> {
        let mut tasks: Vec<ScheduledTask> =
            self.tasks.lock().unwrap().values().cloned().collect();
        tasks.sort_by_key(|task| task.id);
        Ok(tasks)
    }

    async fn delete_task(&self, id: i64) -> ControlPlaneResult<()> {
        self.tasks
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or(ControlPlaneError::TaskNotFound { id })
    }

    async fn record_execution(
        &self,
        id: i64,
        last_execute_time: DateTime<Utc>,
        next_execute_time: Option<DateTime<Utc>>,
    ) -> ControlPlaneResult<()> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(&id)
            .ok_or(ControlPlaneError::TaskNotFound { id })?;
        task.last_execute_time = Some(last_execute_time);
        task.next_execute_time = next_execute_time;
        Ok(())
    }
}

/// TaskExecutionLogRepository 的内存实现
#[derive(Debug, Clone)]
pub struct MockExecutionLogRepository {
    logs: Arc<Mutex<Vec<TaskExecutionLog>>>,
    next_id: Arc<Mutex<i64>>,
    fail_reads: Arc<Mutex<bool>>,
}

impl MockExecutionLogRepository {
    pub fn new() -> Self {
        Self {
            logs: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(Mutex::new(1)),
            fail_reads: Arc::new(Mutex::new(false)),
        }
    }

    pub fn with_logs(logs: Vec<TaskExecutionLog>) -> Self {
        let max_id = logs.iter().map(|log| log.id).max().unwrap_or(0);
        Self {
            logs: Arc::new(Mutex::new(logs)),
            next_id: Arc::new(Mutex::new(max_id + 1)),
            fail_reads: Arc::new(Mutex::new(false)),
        }
    }

    /// 让后续的日志查询返回错误
    pub fn fail_reads(&self, fail: bool) {
        *self.fail_reads.lock().unwrap() = fail;
    }

    pub fn logs_for(&self, task_id: i64) -> Vec<TaskExecutionLog> {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| log.task_id == task_id)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.logs.lock().unwrap().len()
    }
}

impl Default for MockExecutionLogRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskExecutionLogRepository for MockExecutionLogRepository {
    async fn append_execution_log(
        &self,
        entry: &NewExecutionLog,
    ) -> ControlPlaneResult<TaskExecutionLog> {
        let mut logs = self.logs.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let log = entry.clone().into_log(*next_id, Utc::now());
        *next_id += 1;

        logs.push(log.clone());
        Ok(log)
    }

    async fn list_execution_logs(
        &self,
        task_id: i64,
        limit: i64,
    ) -> ControlPlaneResult<Vec<TaskExecutionLog>> {
        if *self.fail_reads.lock().unwrap() {
            return Err(ControlPlaneError::Internal("模拟的日志存储故障".to_string()));
        }

        let mut logs: Vec<TaskExecutionLog> = self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| log.task_id == task_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.id.cmp(&a.id));
        logs.truncate(limit.max(0) as usize);
        Ok(logs)
    }

    async fn delete_logs_before(&self, cutoff: DateTime<Utc>) -> ControlPlaneResult<u64> {
        let mut logs = self.logs.lock().unwrap();
        let before = logs.len();
        logs.retain(|log| log.execute_time >= cutoff);
        Ok((before - logs.len()) as u64)
    }
}

/// Mock执行器的行为
#[derive(Debug, Clone)]
pub enum ExecutorBehavior {
    Succeed,
    Fail(String),
    Panic(String),
    /// 延迟后成功
    Delay(Duration),
}

/// 可配置的 TaskExecutor，记录每次调用并统计并发度
#[derive(Debug, Clone)]
pub struct MockTaskExecutor {
    default_behavior: Arc<Mutex<ExecutorBehavior>>,
    behaviors: Arc<Mutex<HashMap<i64, ExecutorBehavior>>>,
    calls: Arc<Mutex<Vec<(i64, DateTime<Utc>)>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockTaskExecutor {
    pub fn new() -> Self {
        Self::with_behavior(ExecutorBehavior::Succeed)
    }

    pub fn with_behavior(behavior: ExecutorBehavior) -> Self {
        Self {
            default_behavior: Arc::new(Mutex::new(behavior)),
            behaviors: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_behavior(&self, task_id: i64, behavior: ExecutorBehavior) {
        self.behaviors.lock().unwrap().insert(task_id, behavior);
    }

    pub fn call_count(&self, task_id: i64) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == task_id)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// 观察到的最大同时执行数
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn behavior_for(&self, task_id: i64) -> ExecutorBehavior {
        self.behaviors
            .lock()
            .unwrap()
            .get(&task_id)
            .cloned()
            .unwrap_or_else(|| self.default_behavior.lock().unwrap().clone())
    }
}

impl Default for MockTaskExecutor {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskExecutor for MockTaskExecutor {
    async fn execute(&self, task: &ScheduledTask) -> ControlPlaneResult<()> {
        self.calls.lock().unwrap().push((task.id, Utc::now()));

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlightGuard(self.in_flight.clone());

        match self.behavior_for(task.id) {
            ExecutorBehavior::Succeed => Ok(()),
            ExecutorBehavior::Fail(message) => Err(ControlPlaneError::TaskExecution(message)),
            ExecutorBehavior::Panic(message) => panic!("{message}"),
            ExecutorBehavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

/// 记录所有日志通知的 ExecutionLogNotifier
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    notifications: Arc<Mutex<Vec<(i64, TaskExecutionLog)>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<(i64, TaskExecutionLog)> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn count_for(&self, task_id: i64) -> usize {
        self.notifications
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == task_id)
            .count()
    }
}

#[async_trait]
impl ExecutionLogNotifier for RecordingNotifier {
    async fn notify_log(&self, task_id: i64, log: &TaskExecutionLog) {
        self.notifications
            .lock()
            .unwrap()
            .push((task_id, log.clone()));
    }
}

/// 记录收到的事件，可配置为返回错误
#[derive(Debug, Clone)]
pub struct RecordingEventHandler {
    name: String,
    events: Arc<Mutex<Vec<ApplicationEvent>>>,
    failure: Arc<Mutex<Option<fn() -> ControlPlaneError>>>,
}

impl RecordingEventHandler {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            events: Arc::new(Mutex::new(Vec::new())),
            failure: Arc::new(Mutex::new(None)),
        }
    }

    /// 处理器在记录事件后返回 `make_error()` 生成的错误
    pub fn failing(name: &str, make_error: fn() -> ControlPlaneError) -> Self {
        let handler = Self::new(name);
        *handler.failure.lock().unwrap() = Some(make_error);
        handler
    }

    pub fn events(&self) -> Vec<ApplicationEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

#[async_trait]
impl EventHandler for RecordingEventHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &ApplicationEvent) -> ControlPlaneResult<()> {
        self.events.lock().unwrap().push(event.clone());
        match *self.failure.lock().unwrap() {
            Some(make_error) => Err(make_error()),
            None => Ok(()),
        }
    }
}
