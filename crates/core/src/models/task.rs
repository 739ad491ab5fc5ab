use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ControlPlaneError, ControlPlaneResult};

/// HTTP任务默认超时（秒）
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 30;
/// Shell任务默认超时（秒）
pub const DEFAULT_SHELL_TIMEOUT_SECONDS: u64 = 300;

/// 定时任务定义
///
/// 表示一个绑定了cron触发器的后台任务，包含执行方式和调度状态。
///
/// # 字段说明
///
/// - `id`: 任务的唯一标识符
/// - `name`: 任务名称
/// - `description`: 任务描述；shell任务未指定命令时作为命令使用
/// - `cron_expression`: cron表达式，支持5段（分钟级）与6段（秒级）
/// - `kind`: 任务类型及其参数，决定由哪个执行器运行
/// - `status`: 持久化的启停状态
/// - `exec_mode`: 周期执行或一次性执行
/// - `last_execute_time` / `next_execute_time`: 最近一次与下一次执行时间
///
/// # 生命周期
///
/// ```text
/// 创建(disabled) → 启用(enabled, 注册触发器) → 禁用(disabled, 移除触发器)
///                        ↓ 一次性任务执行成功
///                    completed
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub cron_expression: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub exec_mode: ExecMode,
    pub last_execute_time: Option<DateTime<Utc>>,
    pub next_execute_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledTask {
    pub fn is_enabled(&self) -> bool {
        self.status == TaskStatus::Enabled
    }

    pub fn is_one_shot(&self) -> bool {
        self.exec_mode == ExecMode::OneTime
    }

    /// 判断两个任务的调度定义（cron、类型参数、执行模式）是否一致
    ///
    /// 重新加载时只有定义发生变化的触发器才会被替换。
    pub fn same_definition(&self, other: &ScheduledTask) -> bool {
        self.cron_expression == other.cron_expression
            && self.kind == other.kind
            && self.exec_mode == other.exec_mode
    }
}

/// 创建任务请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub cron_expression: String,
    pub kind: TaskKind,
    #[serde(default)]
    pub exec_mode: ExecMode,
}

/// 任务状态
///
/// - `Enabled`: 已启用，调度器中持有触发器
/// - `Disabled`: 已禁用，调度器中不持有触发器
/// - `Completed`: 一次性任务已成功执行，不再调度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Enabled,
    #[default]
    Disabled,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Enabled => "enabled",
            TaskStatus::Disabled => "disabled",
            TaskStatus::Completed => "completed",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = ControlPlaneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enabled" => Ok(TaskStatus::Enabled),
            "disabled" => Ok(TaskStatus::Disabled),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(ControlPlaneError::validation_error(format!(
                "无效的任务状态: {other}"
            ))),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 执行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExecMode {
    /// 按cron周期执行
    #[default]
    #[serde(rename = "recurring")]
    Recurring,
    /// 只执行一次，执行后自动移除触发器
    #[serde(rename = "onetime")]
    OneTime,
}

impl ExecMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecMode::Recurring => "recurring",
            ExecMode::OneTime => "onetime",
        }
    }
}

impl FromStr for ExecMode {
    type Err = ControlPlaneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recurring" | "" => Ok(ExecMode::Recurring),
            "onetime" => Ok(ExecMode::OneTime),
            other => Err(ControlPlaneError::validation_error(format!(
                "无效的执行模式: {other}"
            ))),
        }
    }
}

/// 任务类型
///
/// 封闭的任务类型集合，每种类型携带自己的强类型参数。
/// 存储时拆分为 `task_type` 文本列和 `task_params` JSON列。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task_type", content = "task_params", rename_all = "snake_case")]
pub enum TaskKind {
    Function(FunctionParams),
    Http(HttpParams),
    Shell(ShellParams),
}

impl TaskKind {
    pub fn task_type(&self) -> &'static str {
        match self {
            TaskKind::Function(_) => "function",
            TaskKind::Http(_) => "http",
            TaskKind::Shell(_) => "shell",
        }
    }

    /// 任务参数的JSON表示，用于持久化
    pub fn params_json(&self) -> ControlPlaneResult<Value> {
        let value = match self {
            TaskKind::Function(p) => serde_json::to_value(p)?,
            TaskKind::Http(p) => serde_json::to_value(p)?,
            TaskKind::Shell(p) => serde_json::to_value(p)?,
        };
        Ok(value)
    }

    /// 从存储的类型标签和参数还原任务类型
    pub fn from_parts(task_type: &str, params: Value) -> ControlPlaneResult<Self> {
        let params = if params.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            params
        };

        let parse_err =
            |e: serde_json::Error| ControlPlaneError::invalid_params(format!("{task_type}: {e}"));

        match task_type {
            "function" => serde_json::from_value(params)
                .map(TaskKind::Function)
                .map_err(parse_err),
            "http" => serde_json::from_value(params)
                .map(TaskKind::Http)
                .map_err(parse_err),
            "shell" => serde_json::from_value(params)
                .map(TaskKind::Shell)
                .map_err(parse_err),
            other => Err(ControlPlaneError::invalid_params(format!(
                "未知的任务类型: {other}"
            ))),
        }
    }
}

/// 函数任务参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionParams {
    pub function_name: String,
    #[serde(default)]
    pub params: Value,
}

/// HTTP任务参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpParams {
    pub url: String,
    #[serde(default = "default_http_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// 超时（秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl HttpParams {
    pub fn timeout_seconds(&self) -> u64 {
        self.timeout
            .filter(|t| *t > 0)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECONDS)
    }
}

fn default_http_method() -> String {
    "GET".to_string()
}

/// Shell任务参数
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ShellParams {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// 超时（秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ShellParams {
    pub fn timeout_seconds(&self) -> u64 {
        self.timeout
            .filter(|t| *t > 0)
            .unwrap_or(DEFAULT_SHELL_TIMEOUT_SECONDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_kind_from_parts() {
        let kind = TaskKind::from_parts(
            "shell",
            json!({"command": "echo hello", "timeout": 10}),
        )
        .unwrap();
        match &kind {
            TaskKind::Shell(p) => {
                assert_eq!(p.command, "echo hello");
                assert_eq!(p.timeout_seconds(), 10);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
        assert_eq!(kind.task_type(), "shell");

        let kind = TaskKind::from_parts("http", json!({"url": "http://localhost"})).unwrap();
        match kind {
            TaskKind::Http(p) => {
                assert_eq!(p.method, "GET");
                assert_eq!(p.timeout_seconds(), DEFAULT_HTTP_TIMEOUT_SECONDS);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_task_kind_null_params_use_defaults() {
        let kind = TaskKind::from_parts("shell", Value::Null).unwrap();
        assert_eq!(kind, TaskKind::Shell(ShellParams::default()));
    }

    #[test]
    fn test_task_kind_rejects_unknown_type() {
        let err = TaskKind::from_parts("python", json!({})).unwrap_err();
        assert!(matches!(err, ControlPlaneError::InvalidTaskParams(_)));

        let err = TaskKind::from_parts("function", json!({"params": {}})).unwrap_err();
        assert!(matches!(err, ControlPlaneError::InvalidTaskParams(_)));
    }

    #[test]
    fn test_task_kind_wire_shape() {
        let kind = TaskKind::Function(FunctionParams {
            function_name: "clean_up_old_data".to_string(),
            params: json!({"retention_days": 7}),
        });
        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(value["task_type"], "function");
        assert_eq!(value["task_params"]["function_name"], "clean_up_old_data");
    }

    #[test]
    fn test_status_and_mode_parsing() {
        assert_eq!("enabled".parse::<TaskStatus>().unwrap(), TaskStatus::Enabled);
        assert!("running".parse::<TaskStatus>().is_err());
        assert_eq!("onetime".parse::<ExecMode>().unwrap(), ExecMode::OneTime);
        assert_eq!(
            serde_json::to_value(ExecMode::OneTime).unwrap(),
            json!("onetime")
        );
    }
}
