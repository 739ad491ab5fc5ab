use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use control_plane_core::{
    ApplicationEvent, ControlPlaneError, ControlPlaneResult, EventBus, EventBusKind,
    EventHandler, EventType,
};

use super::HandlerRegistry;

/// 进程内事件总线
///
/// `publish` 在返回前把事件交给所有已注册的处理器，并返回第一个处理器错误。
#[derive(Default)]
pub struct InMemoryEventBus {
    registry: HandlerRegistry,
    closed: AtomicBool,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: ApplicationEvent) -> ControlPlaneResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ControlPlaneError::event_bus("事件总线已关闭"));
        }
        debug!(
            event_id = event.event_id(),
            "发布事件: {}",
            event.event_type()
        );
        self.registry.dispatch(&event).await
    }

    async fn subscribe(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
    ) -> ControlPlaneResult<()> {
        self.registry.register(event_type, handler).await;
        Ok(())
    }

    fn kind(&self) -> EventBusKind {
        EventBusKind::InMemory
    }

    async fn close(&self) -> ControlPlaneResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("内存事件总线已关闭");
        }
        Ok(())
    }
}
