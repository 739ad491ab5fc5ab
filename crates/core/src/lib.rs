pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::*;
pub use models::*;
pub use traits::*;

/// 统一的Result类型
pub type ControlPlaneResult<T> = std::result::Result<T, ControlPlaneError>;
