//! 控制平面的基础设施实现
//!
//! 包含SQLite仓储、事件总线传输和事件处理器。

pub mod database;
pub mod event_bus;
pub mod handlers;

pub use database::*;
pub use event_bus::*;
pub use handlers::*;
