use async_trait::async_trait;

use crate::{
    models::{NewTask, ScheduledTask, TaskExecutionLog},
    ControlPlaneResult,
};

/// 任务控制服务接口
///
/// 管理接口进入调度器的唯一变更入口。
#[async_trait]
pub trait TaskControlService: Send + Sync {
    /// 持久化 enabled 状态并注册触发器
    async fn enable_task(&self, task_id: i64) -> ControlPlaneResult<()>;

    /// 持久化 disabled 状态并移除触发器
    async fn disable_task(&self, task_id: i64) -> ControlPlaneResult<()>;

    /// 按持久化状态重新同步触发器集合
    async fn reload_tasks(&self) -> ControlPlaneResult<()>;

    /// 校验后创建任务（disabled）
    async fn create_task(&self, task: NewTask) -> ControlPlaneResult<ScheduledTask>;

    /// 移除触发器后删除任务记录
    async fn delete_task(&self, task_id: i64) -> ControlPlaneResult<()>;

    async fn is_task_active(&self, task_id: i64) -> bool;

    async fn active_task_ids(&self) -> Vec<i64>;
}

/// 执行日志通知接口
///
/// 运行器在日志写入后调用，推送给订阅了该任务的连接。
#[async_trait]
pub trait ExecutionLogNotifier: Send + Sync {
    async fn notify_log(&self, task_id: i64, log: &TaskExecutionLog);
}
