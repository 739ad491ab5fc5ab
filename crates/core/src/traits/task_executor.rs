use async_trait::async_trait;

use crate::{models::ScheduledTask, ControlPlaneResult};

/// 任务执行器接口
///
/// 执行任务的一次触发。返回错误表示本次执行失败，
/// 错误由运行器记录到执行日志，不会传播到调度器。
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &ScheduledTask) -> ControlPlaneResult<()>;
}
