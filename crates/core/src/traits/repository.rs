//! 数据仓储层接口定义
//!
//! 控制平面只依赖这里定义的操作，不嵌入任何SQL或存储引擎细节：
//! - `TaskRepository` - 定时任务的读取、状态持久化与管理
//! - `TaskExecutionLogRepository` - 只追加的执行日志
//!
//! 所有操作都是异步的，返回 `ControlPlaneResult<T>`，实现需要 `Send + Sync`。
//! 生产实现基于SQLite，测试使用内存实现。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    models::{NewExecutionLog, NewTask, ScheduledTask, TaskExecutionLog, TaskStatus},
    ControlPlaneResult,
};

/// 定时任务仓储接口
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 按ID获取任务，不存在时返回 `None`
    async fn get_task(&self, id: i64) -> ControlPlaneResult<Option<ScheduledTask>>;

    /// 列出所有持久化状态为 enabled 的任务
    async fn list_enabled_tasks(&self) -> ControlPlaneResult<Vec<ScheduledTask>>;

    /// 更新任务状态，任务不存在时返回 `TaskNotFound`
    async fn update_task_status(&self, id: i64, status: TaskStatus) -> ControlPlaneResult<()>;

    /// 创建任务，新任务总是处于 disabled 状态
    async fn create_task(&self, task: &NewTask) -> ControlPlaneResult<ScheduledTask>;

    async fn list_tasks(&self) -> ControlPlaneResult<Vec<ScheduledTask>>;

    /// 删除任务记录，任务不存在时返回 `TaskNotFound`
    async fn delete_task(&self, id: i64) -> ControlPlaneResult<()>;

    /// 记录最近一次和下一次执行时间
    async fn record_execution(
        &self,
        id: i64,
        last_execute_time: DateTime<Utc>,
        next_execute_time: Option<DateTime<Utc>>,
    ) -> ControlPlaneResult<()>;
}

/// 任务执行日志仓储接口
#[async_trait]
pub trait TaskExecutionLogRepository: Send + Sync {
    /// 追加一条执行日志并返回带ID的记录
    async fn append_execution_log(
        &self,
        entry: &NewExecutionLog,
    ) -> ControlPlaneResult<TaskExecutionLog>;

    /// 获取任务最近的执行日志，最新的在前
    async fn list_execution_logs(
        &self,
        task_id: i64,
        limit: i64,
    ) -> ControlPlaneResult<Vec<TaskExecutionLog>>;

    /// 删除早于指定时间的日志，返回删除条数
    async fn delete_logs_before(&self, cutoff: DateTime<Utc>) -> ControlPlaneResult<u64>;
}
