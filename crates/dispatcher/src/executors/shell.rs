use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use control_plane_core::{ControlPlaneError, ControlPlaneResult, ScheduledTask, ShellParams};

/// Shell任务执行器
///
/// 进程在超时后被终止（`kill_on_drop`），非零退出码视为失败。
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }

    /// 解析出要执行的程序和参数
    ///
    /// `command` 为空时使用任务描述；未指定 `args` 时按空白拆分命令字符串。
    pub fn resolve_command(
        params: &ShellParams,
        description: &str,
    ) -> ControlPlaneResult<(String, Vec<String>)> {
        let command = if params.command.trim().is_empty() {
            description.trim()
        } else {
            params.command.trim()
        };

        if command.is_empty() {
            return Err(ControlPlaneError::InvalidTaskParams(
                "Shell任务缺少要执行的命令".to_string(),
            ));
        }

        if params.args.is_empty() {
            let mut parts = command.split_whitespace().map(str::to_string);
            let program = parts.next().unwrap_or_default();
            Ok((program, parts.collect()))
        } else {
            Ok((command.to_string(), params.args.clone()))
        }
    }

    pub async fn execute(&self, task: &ScheduledTask, params: &ShellParams) -> ControlPlaneResult<()> {
        let (program, args) = Self::resolve_command(params, &task.description)?;
        let timeout_seconds = params.timeout_seconds();

        info!(
            task_id = task.id,
            "执行Shell任务: {} {:?}", program, args
        );

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = params.work_dir.as_deref().filter(|dir| !dir.is_empty()) {
            cmd.current_dir(dir);
        }
        cmd.envs(&params.env);

        let output = tokio::time::timeout(Duration::from_secs(timeout_seconds), cmd.output())
            .await
            .map_err(|_| {
                ControlPlaneError::Timeout(format!(
                    "Shell命令执行超时({timeout_seconds}秒): {program}"
                ))
            })?
            .map_err(|e| ControlPlaneError::TaskExecution(format!("启动Shell命令失败: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            debug!(task_id = task.id, "Shell命令输出: {}", stdout.trim_end());
            return Ok(());
        }

        let combined = [stdout.trim(), stderr.trim()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        Err(ControlPlaneError::TaskExecution(format!(
            "命令执行失败，退出码: {:?}, 输出: {}",
            output.status.code(),
            combined
        )))
    }
}
