//! # 数据模型
//!
//! 控制平面的核心数据结构：定时任务、执行日志和应用事件。
//!
//! 所有时间字段使用 `DateTime<Utc>`，状态字段使用枚举，避免无效状态。
//! 任务类型和事件类型都是封闭的枚举，各自携带强类型载荷，
//! 动态的JSON形式只出现在存储和网络边界上。

pub mod event;
pub mod execution_log;
pub mod task;

pub use event::*;
pub use execution_log::*;
pub use task::*;
