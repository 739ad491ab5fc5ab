//! 定时任务调度
//!
//! - `scheduler`: 任务ID到触发器的注册表，支持启动、停止和重新加载
//! - `runner`: 执行一次任务并写入执行日志
//! - `executors`: 函数、HTTP、Shell三类任务的执行器
//! - `controller`: 管理接口使用的任务控制服务

pub mod controller;
pub mod cron_utils;
pub mod executors;
pub mod runner;
pub mod scheduler;

pub use controller::TaskController;
pub use cron_utils::CronScheduler;
pub use executors::{ExecutorRegistry, FunctionContext, FunctionExecutor};
pub use runner::TaskRunner;
pub use scheduler::{ReloadSummary, TaskRegistry};
