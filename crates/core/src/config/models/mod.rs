pub mod app_config;
pub mod database;
pub mod event_bus;
pub mod scheduler_api;

pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use event_bus::{mask_url, EventBusConfig, RabbitMqConfig};
pub use scheduler_api::{ApiConfig, LoggingConfig, SchedulerConfig};
