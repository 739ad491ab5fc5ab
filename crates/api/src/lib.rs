//! # 控制平面 API
//!
//! 基于Axum的管理接口与WebSocket推送。
//!
//! ## 端点
//!
//! - `GET /health` - 健康检查
//! - `GET|POST /api/tasks` - 任务列表 / 创建任务（禁用状态）
//! - `GET /api/tasks/{id}` - 任务详情，包含是否持有触发器
//! - `POST /api/tasks/{id}/enable|disable|delete` - 启用、禁用、删除
//! - `POST /api/tasks/reload` - 按持久化状态重新同步触发器
//! - `GET /api/tasks/{id}/logs?limit=` - 最近的执行日志
//! - `GET /api/scheduler/active` - 活跃触发器
//! - `POST /api/events` - 发布事件
//! - `GET /ws/scheduleLog` - 执行日志订阅
//! - `GET /ws/user/status?userId=&deviceId=` - 设备在线状态
//!
//! 成功响应使用统一信封 `{success, data, message, timestamp}`。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;
pub mod websocket;

use axum::Router;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, trace_layer};
pub use routes::{create_routes, AppState};

/// 创建带中间件的完整API应用
pub fn create_app(state: AppState, cors_enabled: bool) -> Router {
    let app = create_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    );

    if cors_enabled {
        app.layer(cors_layer())
    } else {
        app
    }
}
