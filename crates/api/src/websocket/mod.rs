//! WebSocket接口
//!
//! - `/ws/scheduleLog` - 订阅任务执行日志
//! - `/ws/user/status` - 用户设备在线状态

pub mod connection;
pub mod handler;
pub mod messages;
pub mod presence;
pub mod subscriptions;

pub use connection::{ConnectionHandle, ConnectionToken, PushError};
pub use handler::{schedule_log_ws, user_status_ws};
pub use messages::{LogStreamMessage, SubscribeRequest, DEFAULT_BACKLOG_LIMIT};
pub use presence::{PresenceSession, SessionManager};
pub use subscriptions::LogSubscriptionManager;
