//! # Control Plane Testing Utils
//!
//! 控制平面各crate共享的测试工具：
//!
//! - **Mock Repositories**: 任务与执行日志仓储的内存实现
//! - **Mock Executor**: 可配置成功、失败、panic、延迟的任务执行器
//! - **Recorders**: 记录日志通知与事件分发的测试替身
//! - **Builders**: 测试数据构建器
//! - **Helpers**: 异步条件等待等通用工具
//!
//! ```toml
//! [dev-dependencies]
//! control-plane-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
