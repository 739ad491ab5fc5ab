//! 事件总线实现
//!
//! - `InMemoryEventBus` - 进程内同步分发
//! - `RabbitMqEventBus` - 经由RabbitMQ主题交换机的持久化投递
//! - `EventBusFactory` - 按配置选择实现，消息代理不可用时回退到内存实现

pub mod factory;
pub mod in_memory;
pub mod rabbitmq;

pub use factory::EventBusFactory;
pub use in_memory::InMemoryEventBus;
pub use rabbitmq::RabbitMqEventBus;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use control_plane_core::{ApplicationEvent, ControlPlaneResult, EventHandler, EventType};

/// 按事件类型索引的处理器表
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<EventType, Vec<Arc<dyn EventHandler>>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器，返回该类型此前是否没有任何处理器
    pub async fn register(&self, event_type: EventType, handler: Arc<dyn EventHandler>) -> bool {
        let mut handlers = self.handlers.write().await;
        let entry = handlers.entry(event_type).or_default();
        let first = entry.is_empty();
        debug!("注册事件处理器 {} -> {}", handler.name(), event_type);
        entry.push(handler);
        first
    }

    pub async fn handler_count(&self, event_type: EventType) -> usize {
        self.handlers
            .read()
            .await
            .get(&event_type)
            .map_or(0, Vec::len)
    }

    /// 把事件交给该类型的所有处理器
    ///
    /// 处理器在释放读锁之后运行，一个处理器失败不影响其余处理器，
    /// 全部运行完成后返回第一个错误。
    pub async fn dispatch(&self, event: &ApplicationEvent) -> ControlPlaneResult<()> {
        let handlers = self
            .handlers
            .read()
            .await
            .get(&event.event_type())
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            debug!("事件 {} 没有注册处理器", event.event_type());
            return Ok(());
        }

        let mut first_error = None;
        for handler in handlers {
            if let Err(e) = handler.handle(event).await {
                warn!(
                    event_id = event.event_id(),
                    "事件处理器 {} 处理 {} 失败: {}",
                    handler.name(),
                    event.event_type(),
                    e
                );
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
