use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, info};

use control_plane_core::{
    ControlPlaneError, ControlPlaneResult, FunctionParams, ScheduledTask,
    TaskExecutionLogRepository,
};

/// 内置的日志清理函数名
pub const CLEAN_UP_OLD_DATA: &str = "clean_up_old_data";

/// 日志默认保留天数
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// 函数任务的调用上下文
#[derive(Debug, Clone)]
pub struct FunctionContext {
    pub task_id: i64,
    pub task_name: String,
    pub params: Value,
}

pub type TaskFunction =
    Arc<dyn Fn(FunctionContext) -> BoxFuture<'static, ControlPlaneResult<()>> + Send + Sync>;

/// 函数任务执行器
///
/// 按 `function_name` 查找注册的异步函数，未注册的名称执行失败。
#[derive(Clone, Default)]
pub struct FunctionExecutor {
    functions: HashMap<String, TaskFunction>,
}

impl FunctionExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册内置函数
    pub fn with_builtins(self, log_repo: Arc<dyn TaskExecutionLogRepository>) -> Self {
        self.register(CLEAN_UP_OLD_DATA, move |ctx| {
            clean_up_old_data(log_repo.clone(), ctx)
        })
    }

    pub fn register<F, Fut>(mut self, name: &str, function: F) -> Self
    where
        F: Fn(FunctionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ControlPlaneResult<()>> + Send + 'static,
    {
        self.functions.insert(
            name.to_string(),
            Arc::new(move |ctx: FunctionContext| function(ctx).boxed()),
        );
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn execute(
        &self,
        task: &ScheduledTask,
        params: &FunctionParams,
    ) -> ControlPlaneResult<()> {
        let function = self.functions.get(&params.function_name).ok_or_else(|| {
            ControlPlaneError::TaskExecution(format!(
                "未注册的函数: {}",
                params.function_name
            ))
        })?;

        debug!(
            task_id = task.id,
            "调用函数任务: {}", params.function_name
        );

        function(FunctionContext {
            task_id: task.id,
            task_name: task.name.clone(),
            params: params.params.clone(),
        })
        .await
    }
}

async fn clean_up_old_data(
    log_repo: Arc<dyn TaskExecutionLogRepository>,
    ctx: FunctionContext,
) -> ControlPlaneResult<()> {
    let retention_days = ctx
        .params
        .get("retention_days")
        .and_then(Value::as_i64)
        .filter(|days| *days > 0)
        .unwrap_or(DEFAULT_RETENTION_DAYS);

    let cutoff = Utc::now() - chrono::Duration::days(retention_days);
    let deleted = log_repo.delete_logs_before(cutoff).await?;

    info!(
        task_id = ctx.task_id,
        retention_days, "清理过期执行日志完成，删除 {} 条", deleted
    );
    Ok(())
}
