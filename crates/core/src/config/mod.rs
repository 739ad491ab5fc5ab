//! 控制平面配置
//!
//! 配置由 `config` crate 分层加载：内置默认值、TOML文件、环境变量。
//! 各配置段自带 `validate()`，加载完成后统一校验。

pub mod models;


pub use models::app_config::{DEFAULT_CONFIG_PATH, ENV_PREFIX};
pub use models::{
    mask_url, ApiConfig, AppConfig, DatabaseConfig, EventBusConfig, LoggingConfig, RabbitMqConfig,
    SchedulerConfig,
};
