use std::collections::HashSet;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use control_plane_core::{ControlPlaneError, NewTask, ScheduledTask};

use crate::{
    error::{ApiError, ApiResult},
    response::{created, ok_with_message, success},
    routes::AppState,
};

/// 日志查询的最大条数
pub const MAX_LOG_LIMIT: i64 = 1000;
const DEFAULT_LOG_LIMIT: i64 = 100;

/// 任务及其触发器状态
#[derive(Debug, Serialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: ScheduledTask,
    /// 调度器中是否持有触发器
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct LogQueryParams {
    pub limit: Option<i64>,
}

impl LogQueryParams {
    fn effective_limit(&self) -> i64 {
        match self.limit {
            Some(limit) if limit > 0 => limit.min(MAX_LOG_LIMIT),
            _ => DEFAULT_LOG_LIMIT,
        }
    }
}

/// 获取任务列表
pub async fn list_tasks(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let tasks = state.task_repo.list_tasks().await?;
    let active: HashSet<i64> = state
        .task_controller
        .active_task_ids()
        .await
        .into_iter()
        .collect();

    let views: Vec<TaskView> = tasks
        .into_iter()
        .map(|task| TaskView {
            active: active.contains(&task.id),
            task,
        })
        .collect();
    Ok(success(views))
}

/// 创建任务，新任务处于禁用状态
pub async fn create_task(
    State(state): State<AppState>,
    request: Result<Json<NewTask>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = request.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let task = state.task_controller.create_task(request).await?;
    Ok(created(TaskView {
        task,
        active: false,
    }))
}

/// 获取单个任务
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let task = state
        .task_repo
        .get_task(id)
        .await?
        .ok_or(ControlPlaneError::TaskNotFound { id })?;
    let active = state.task_controller.is_task_active(id).await;
    Ok(success(TaskView { task, active }))
}

/// 删除任务
pub async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state.task_controller.delete_task(id).await?;
    Ok(ok_with_message(format!("任务 {id} 已删除")))
}

pub async fn enable_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state.task_controller.enable_task(id).await?;
    Ok(ok_with_message(format!("任务 {id} 已启用")))
}

pub async fn disable_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state.task_controller.disable_task(id).await?;
    Ok(ok_with_message(format!("任务 {id} 已禁用")))
}

/// 按持久化状态重新同步触发器
pub async fn reload_tasks(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    state.task_controller.reload_tasks().await?;
    let active = state.task_controller.active_task_ids().await;
    Ok(success(active))
}

/// 获取任务最近的执行日志，最新的在前
pub async fn get_task_logs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<LogQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let logs = state
        .log_repo
        .list_execution_logs(id, params.effective_limit())
        .await?;
    Ok(success(logs))
}

/// 当前持有触发器的任务ID
pub async fn active_tasks(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(success(state.task_controller.active_task_ids().await))
}
