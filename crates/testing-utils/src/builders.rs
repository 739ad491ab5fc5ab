//! 测试数据构建器
//!
//! 提供带合理默认值的构建器，便于按需修改个别字段。

use chrono::{DateTime, Utc};
use control_plane_core::{
    ExecMode, ExecuteResult, FunctionParams, ScheduledTask, ShellParams, TaskExecutionLog,
    TaskKind, TaskStatus,
};

/// ScheduledTask 构建器，默认是每秒触发、已启用的函数任务
pub struct TaskBuilder {
    task: ScheduledTask,
}

impl TaskBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            task: ScheduledTask {
                id: 1,
                name: "test_task".to_string(),
                description: String::new(),
                cron_expression: "* * * * * *".to_string(),
                kind: TaskKind::Function(FunctionParams {
                    function_name: "noop".to_string(),
                    params: serde_json::json!({}),
                }),
                status: TaskStatus::Enabled,
                exec_mode: ExecMode::Recurring,
                last_execute_time: None,
                next_execute_time: None,
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.task.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.task.name = name.to_string();
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.task.description = description.to_string();
        self
    }

    pub fn with_cron(mut self, cron_expression: &str) -> Self {
        self.task.cron_expression = cron_expression.to_string();
        self
    }

    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.task.kind = kind;
        self
    }

    pub fn with_function(mut self, function_name: &str, params: serde_json::Value) -> Self {
        self.task.kind = TaskKind::Function(FunctionParams {
            function_name: function_name.to_string(),
            params,
        });
        self
    }

    pub fn with_shell(mut self, command: &str, args: &[&str]) -> Self {
        self.task.kind = TaskKind::Shell(ShellParams {
            command: command.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            ..ShellParams::default()
        });
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn disabled(self) -> Self {
        self.with_status(TaskStatus::Disabled)
    }

    pub fn one_shot(mut self) -> Self {
        self.task.exec_mode = ExecMode::OneTime;
        self
    }

    pub fn build(self) -> ScheduledTask {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// TaskExecutionLog 构建器
pub struct ExecutionLogBuilder {
    log: TaskExecutionLog,
}

impl ExecutionLogBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            log: TaskExecutionLog {
                id: 1,
                task_id: 1,
                execute_time: now,
                execute_result: ExecuteResult::Success,
                execute_duration: Some(10),
                error_message: String::new(),
                created_at: now,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.log.id = id;
        self
    }

    pub fn with_task_id(mut self, task_id: i64) -> Self {
        self.log.task_id = task_id;
        self
    }

    pub fn with_execute_time(mut self, execute_time: DateTime<Utc>) -> Self {
        self.log.execute_time = execute_time;
        self
    }

    pub fn failed(mut self, error_message: &str) -> Self {
        self.log.execute_result = ExecuteResult::Failure;
        self.log.error_message = error_message.to_string();
        self
    }

    pub fn build(self) -> TaskExecutionLog {
        self.log
    }
}

impl Default for ExecutionLogBuilder {
    fn default() -> Self {
        Self::new()
    }
}
