use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    models::{ApplicationEvent, EventType},
    ControlPlaneResult,
};

/// 事件总线传输类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventBusKind {
    #[default]
    InMemory,
    #[serde(rename = "rabbitmq")]
    RabbitMq,
}

impl fmt::Display for EventBusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventBusKind::InMemory => f.write_str("in_memory"),
            EventBusKind::RabbitMq => f.write_str("rabbitmq"),
        }
    }
}

/// 事件处理器接口
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, event: &ApplicationEvent) -> ControlPlaneResult<()>;
}

/// 事件总线接口
///
/// 内存实现同步分发，`publish` 返回第一个处理器错误；
/// 消息代理实现只返回传输层错误，处理器在消费端运行。
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: ApplicationEvent) -> ControlPlaneResult<()>;

    /// 为事件类型注册处理器，同一类型允许多个处理器，分发顺序不保证
    async fn subscribe(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
    ) -> ControlPlaneResult<()>;

    fn kind(&self) -> EventBusKind;

    async fn close(&self) -> ControlPlaneResult<()>;
}
