use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    database::DatabaseConfig,
    event_bus::EventBusConfig,
    scheduler_api::{ApiConfig, LoggingConfig, SchedulerConfig},
};

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/control-plane.toml";

/// 环境变量前缀，例如 `CONTROL_PLANE__EVENT_BUS__KIND=rabbitmq`
pub const ENV_PREFIX: &str = "CONTROL_PLANE";

/// 控制平面配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub event_bus: EventBusConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后者覆盖前者）：
    /// 1. 内置默认值
    /// 2. TOML配置文件，未指定路径时尝试 `config/control-plane.toml`
    /// 3. `CONTROL_PLANE__` 前缀的环境变量
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = AppConfig::default();
        let mut builder = ConfigBuilder::builder()
            .set_default("database.url", defaults.database.url.as_str())?
            .set_default("database.max_connections", defaults.database.max_connections)?
            .set_default("database.min_connections", defaults.database.min_connections)?
            .set_default(
                "database.connection_timeout_seconds",
                defaults.database.connection_timeout_seconds,
            )?
            .set_default(
                "database.idle_timeout_seconds",
                defaults.database.idle_timeout_seconds,
            )?
            .set_default("scheduler.enabled", defaults.scheduler.enabled)?
            .set_default(
                "scheduler.shutdown_grace_seconds",
                defaults.scheduler.shutdown_grace_seconds,
            )?
            .set_default("event_bus.kind", defaults.event_bus.kind.to_string())?
            .set_default("event_bus.rabbitmq.url", defaults.event_bus.rabbitmq.url.as_str())?
            .set_default(
                "event_bus.rabbitmq.exchange",
                defaults.event_bus.rabbitmq.exchange.as_str(),
            )?
            .set_default(
                "event_bus.rabbitmq.queue",
                defaults.event_bus.rabbitmq.queue.as_str(),
            )?
            .set_default(
                "event_bus.rabbitmq.consumer_tag",
                defaults.event_bus.rabbitmq.consumer_tag.as_str(),
            )?
            .set_default(
                "event_bus.rabbitmq.connect_timeout_seconds",
                defaults.event_bus.rabbitmq.connect_timeout_seconds,
            )?
            .set_default("api.enabled", defaults.api.enabled)?
            .set_default("api.bind_address", defaults.api.bind_address.as_str())?
            .set_default("api.cors_enabled", defaults.api.cors_enabled)?
            .set_default("api.websocket_buffer", defaults.api.websocket_buffer as u64)?
            .set_default("logging.level", defaults.logging.level.as_str())?
            .set_default("logging.format", defaults.logging.format.as_str())?;

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else if Path::new(DEFAULT_CONFIG_PATH).exists() {
            builder = builder.add_source(File::new(DEFAULT_CONFIG_PATH, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// 从TOML字符串加载配置，缺失的部分使用默认值
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.scheduler.validate().context("调度器配置验证失败")?;
        self.event_bus.validate().context("事件总线配置验证失败")?;
        self.api.validate().context("API配置验证失败")?;
        self.logging.validate().context("日志配置验证失败")?;
        Ok(())
    }
}
