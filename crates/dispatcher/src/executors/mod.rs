//! 任务执行器
//!
//! `ExecutorRegistry` 按任务类型分发到函数、HTTP、Shell三种执行器。

pub mod function;
pub mod http;
pub mod shell;

use std::sync::Arc;

use async_trait::async_trait;

use control_plane_core::{
    ControlPlaneError, ControlPlaneResult, ScheduledTask, TaskExecutionLogRepository,
    TaskExecutor, TaskKind,
};

pub use function::{FunctionContext, FunctionExecutor, TaskFunction, CLEAN_UP_OLD_DATA};
pub use http::HttpExecutor;
pub use shell::ShellExecutor;

/// 生产环境使用的任务执行器
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    function: FunctionExecutor,
    http: HttpExecutor,
    shell: ShellExecutor,
}

impl ExecutorRegistry {
    pub fn new(function: FunctionExecutor) -> Self {
        Self {
            function,
            http: HttpExecutor::new(),
            shell: ShellExecutor::new(),
        }
    }

    /// 只带内置函数的执行器
    pub fn with_builtins(log_repo: Arc<dyn TaskExecutionLogRepository>) -> Self {
        Self::new(FunctionExecutor::new().with_builtins(log_repo))
    }

    pub fn functions(&self) -> &FunctionExecutor {
        &self.function
    }
}

#[async_trait]
impl TaskExecutor for ExecutorRegistry {
    async fn execute(&self, task: &ScheduledTask) -> ControlPlaneResult<()> {
        match &task.kind {
            TaskKind::Function(params) => self.function.execute(task, params).await,
            TaskKind::Http(params) => self.http.execute(task, params).await,
            TaskKind::Shell(params) => self.shell.execute(task, params).await,
        }
    }
}

/// 校验任务类型参数，在创建和启用任务前调用
pub fn validate_task_kind(kind: &TaskKind, description: &str) -> ControlPlaneResult<()> {
    match kind {
        TaskKind::Function(params) => {
            if params.function_name.trim().is_empty() {
                return Err(ControlPlaneError::InvalidTaskParams(
                    "函数任务缺少 function_name".to_string(),
                ));
            }
        }
        TaskKind::Http(params) => {
            if params.url.trim().is_empty() {
                return Err(ControlPlaneError::InvalidTaskParams(
                    "HTTP任务缺少 url".to_string(),
                ));
            }
            HttpExecutor::parse_method(&params.method)?;
        }
        TaskKind::Shell(params) => {
            ShellExecutor::resolve_command(params, description)?;
        }
    }
    Ok(())
}
