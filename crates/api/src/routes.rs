use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use control_plane_core::{EventBus, TaskControlService, TaskExecutionLogRepository, TaskRepository};

use crate::handlers::{
    events::publish_event,
    health::health_check,
    tasks::{
        active_tasks, create_task, delete_task, disable_task, enable_task, get_task,
        get_task_logs, list_tasks, reload_tasks,
    },
};
use crate::websocket::{schedule_log_ws, user_status_ws, LogSubscriptionManager, SessionManager};

/// WebSocket发送缓冲区默认大小
pub const DEFAULT_WEBSOCKET_BUFFER: usize = 256;

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub task_repo: Arc<dyn TaskRepository>,
    pub log_repo: Arc<dyn TaskExecutionLogRepository>,
    pub task_controller: Arc<dyn TaskControlService>,
    pub event_bus: Arc<dyn EventBus>,
    pub subscriptions: Arc<LogSubscriptionManager>,
    pub sessions: Arc<SessionManager>,
    pub shutdown: CancellationToken,
    pub websocket_buffer: usize,
}

impl AppState {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        log_repo: Arc<dyn TaskExecutionLogRepository>,
        task_controller: Arc<dyn TaskControlService>,
        event_bus: Arc<dyn EventBus>,
        subscriptions: Arc<LogSubscriptionManager>,
    ) -> Self {
        Self {
            task_repo,
            log_repo,
            task_controller,
            event_bus,
            subscriptions,
            sessions: Arc::new(SessionManager::new()),
            shutdown: CancellationToken::new(),
            websocket_buffer: DEFAULT_WEBSOCKET_BUFFER,
        }
    }

    /// 取消该令牌会关闭所有WebSocket连接
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_websocket_buffer(mut self, buffer: usize) -> Self {
        self.websocket_buffer = buffer.max(1);
        self
    }
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // 任务管理API
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/reload", post(reload_tasks))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/delete", post(delete_task))
        .route("/api/tasks/{id}/enable", post(enable_task))
        .route("/api/tasks/{id}/disable", post(disable_task))
        .route("/api/tasks/{id}/logs", get(get_task_logs))
        .route("/api/scheduler/active", get(active_tasks))
        // 事件
        .route("/api/events", post(publish_event))
        // WebSocket
        .route("/ws/scheduleLog", get(schedule_log_ws))
        .route("/ws/user/status", get(user_status_ws))
        .with_state(state)
}
