use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    acker::Acker, options::*, publisher_confirm::Confirmation, types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use control_plane_core::{
    config::RabbitMqConfig, ApplicationEvent, ControlPlaneError, ControlPlaneResult, EventBus,
    EventBusKind, EventEnvelope, EventHandler, EventType,
};

use super::HandlerRegistry;

/// 消费端对一条投递的处置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Ack,
    Requeue,
    Reject,
}

/// RabbitMQ事件总线
///
/// 事件以JSON信封发布到持久化的主题交换机，路由键为事件类型。
/// 通道开启发布确认，`publish` 等待代理确认并受连接超时限制；
/// 只报告传输层错误，处理器在后台消费者中运行。
pub struct RabbitMqEventBus {
    connection: Connection,
    channel: Arc<Mutex<Channel>>,
    config: RabbitMqConfig,
    registry: HandlerRegistry,
    bound: Mutex<HashSet<EventType>>,
    shutdown: CancellationToken,
}

impl RabbitMqEventBus {
    /// 连接消息代理，声明交换机和队列，并启动后台消费者
    pub async fn connect(config: RabbitMqConfig) -> ControlPlaneResult<Self> {
        let connection = Connection::connect(&config.url, ConnectionProperties::default())
            .await
            .map_err(|e| ControlPlaneError::event_bus(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| ControlPlaneError::event_bus(format!("创建通道失败: {e}")))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| ControlPlaneError::event_bus(format!("开启发布确认失败: {e}")))?;

        info!("成功连接到RabbitMQ: {}", config.masked_url());

        channel
            .exchange_declare(
                &config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                ControlPlaneError::event_bus(format!("声明交换机 {} 失败: {e}", config.exchange))
            })?;

        channel
            .queue_declare(
                &config.queue,
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                ControlPlaneError::event_bus(format!("声明队列 {} 失败: {e}", config.queue))
            })?;

        debug!("交换机 {} 与队列 {} 声明完成", config.exchange, config.queue);

        let bus = Self {
            connection,
            channel: Arc::new(Mutex::new(channel)),
            config,
            registry: HandlerRegistry::new(),
            bound: Mutex::new(HashSet::new()),
            shutdown: CancellationToken::new(),
        };
        bus.start_consumer().await?;
        Ok(bus)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    async fn bind_event_type(&self, event_type: EventType) -> ControlPlaneResult<()> {
        let mut bound = self.bound.lock().await;
        if bound.contains(&event_type) {
            return Ok(());
        }

        let channel = self.channel.lock().await;
        channel
            .queue_bind(
                &self.config.queue,
                &self.config.exchange,
                event_type.as_str(),
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                ControlPlaneError::event_bus(format!("绑定路由键 {event_type} 失败: {e}"))
            })?;

        bound.insert(event_type);
        debug!("队列 {} 已绑定路由键 {}", self.config.queue, event_type);
        Ok(())
    }

    async fn start_consumer(&self) -> ControlPlaneResult<()> {
        let consumer = {
            let channel = self.channel.lock().await;
            channel
                .basic_consume(
                    &self.config.queue,
                    &self.config.consumer_tag,
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| ControlPlaneError::event_bus(format!("创建消费者失败: {e}")))?
        };

        debug!(
            "为队列 {} 创建消费者: {}",
            self.config.queue, self.config.consumer_tag
        );
        tokio::spawn(consume_loop(
            consumer,
            self.registry.clone(),
            self.shutdown.clone(),
        ));
        Ok(())
    }

    fn encode(event: &ApplicationEvent) -> ControlPlaneResult<(Vec<u8>, BasicProperties)> {
        let payload = serde_json::to_vec(&event.to_envelope()?)?;
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_message_id(event.event_id().to_string().into())
            .with_type(event.event_type().as_str().into())
            .with_timestamp(event.timestamp().timestamp().max(0) as u64)
            .with_delivery_mode(2);
        Ok((payload, properties))
    }
}

async fn consume_loop(mut consumer: Consumer, registry: HandlerRegistry, shutdown: CancellationToken) {
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = consumer.next() => next,
        };

        let delivery = match next {
            Some(Ok(delivery)) => delivery,
            Some(Err(e)) => {
                error!("接收RabbitMQ消息失败: {}", e);
                continue;
            }
            None => {
                info!("RabbitMQ消费者已结束");
                break;
            }
        };

        let outcome = handle_delivery(&registry, &delivery.data).await;
        if let Err(e) = settle(&delivery.acker, outcome).await {
            warn!("确认消息失败: {}", e);
        }
    }
}

/// 解码一条投递并交给本地处理器
pub async fn handle_delivery(registry: &HandlerRegistry, data: &[u8]) -> DeliveryOutcome {
    let event = match serde_json::from_slice::<EventEnvelope>(data)
        .map_err(ControlPlaneError::from)
        .and_then(ApplicationEvent::from_envelope)
    {
        Ok(event) => event,
        Err(e) => {
            warn!("丢弃无法解析的事件消息: {}", e);
            return DeliveryOutcome::Reject;
        }
    };

    match registry.dispatch(&event).await {
        Ok(()) => DeliveryOutcome::Ack,
        Err(e) if e.is_retryable() => {
            warn!(event_id = event.event_id(), "事件处理失败，重新入队: {}", e);
            DeliveryOutcome::Requeue
        }
        Err(e) => {
            warn!(event_id = event.event_id(), "事件处理失败，不再重试: {}", e);
            DeliveryOutcome::Reject
        }
    }
}

/// 投递的确认端
#[async_trait]
pub(crate) trait DeliverySettler: Send + Sync {
    async fn ack(&self, options: BasicAckOptions) -> lapin::Result<bool>;
    async fn nack(&self, options: BasicNackOptions) -> lapin::Result<bool>;
}

#[async_trait]
impl DeliverySettler for Acker {
    async fn ack(&self, options: BasicAckOptions) -> lapin::Result<bool> {
        Acker::ack(self, options).await
    }

    async fn nack(&self, options: BasicNackOptions) -> lapin::Result<bool> {
        Acker::nack(self, options).await
    }
}

/// 按处置结果确认或拒绝投递
///
/// 返回 `false` 表示投递已被确认过或通道已关闭，只记录日志。
async fn settle<S>(settler: &S, outcome: DeliveryOutcome) -> lapin::Result<()>
where
    S: DeliverySettler + ?Sized,
{
    let settled = match outcome {
        DeliveryOutcome::Ack => settler.ack(BasicAckOptions::default()).await?,
        DeliveryOutcome::Requeue => {
            settler
                .nack(BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                })
                .await?
        }
        DeliveryOutcome::Reject => {
            settler
                .nack(BasicNackOptions {
                    requeue: false,
                    ..Default::default()
                })
                .await?
        }
    };

    if !settled {
        warn!(?outcome, "投递未被处置，可能已确认过或通道已关闭");
    }
    Ok(())
}

#[async_trait]
impl EventBus for RabbitMqEventBus {
    async fn publish(&self, event: ApplicationEvent) -> ControlPlaneResult<()> {
        let (payload, properties) = Self::encode(&event)?;
        let routing_key = event.event_type().as_str();

        let limit = connect_timeout(&self.config);
        within_timeout(limit, routing_key, async {
            let channel = self.channel.lock().await;
            let confirm = channel
                .basic_publish(
                    &self.config.exchange,
                    routing_key,
                    BasicPublishOptions::default(),
                    &payload,
                    properties,
                )
                .await
                .map_err(|e| {
                    ControlPlaneError::event_bus(format!("发布事件 {routing_key} 失败: {e}"))
                })?;

            let confirmation = confirm
                .await
                .map_err(|e| ControlPlaneError::event_bus(format!("事件发布确认失败: {e}")))?;
            check_confirmation(routing_key, &confirmation)
        })
        .await?;

        debug!(event_id = event.event_id(), "事件已发布: {}", routing_key);
        Ok(())
    }

    async fn subscribe(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
    ) -> ControlPlaneResult<()> {
        self.bind_event_type(event_type).await?;
        self.registry.register(event_type, handler).await;
        Ok(())
    }

    fn kind(&self) -> EventBusKind {
        EventBusKind::RabbitMq
    }

    async fn close(&self) -> ControlPlaneResult<()> {
        self.shutdown.cancel();
        if !self.is_connected() {
            return Ok(());
        }
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| ControlPlaneError::event_bus(format!("关闭连接失败: {e}")))?;

        info!("RabbitMQ连接已关闭");
        Ok(())
    }
}

/// 代理拒绝的发布视为失败
fn check_confirmation(routing_key: &str, confirmation: &Confirmation) -> ControlPlaneResult<()> {
    if confirmation.is_nack() {
        return Err(ControlPlaneError::event_bus(format!(
            "代理拒绝了事件 {routing_key}"
        )));
    }
    Ok(())
}

/// 发布与确认整体受超时限制
async fn within_timeout<F>(limit: Duration, routing_key: &str, publish: F) -> ControlPlaneResult<()>
where
    F: Future<Output = ControlPlaneResult<()>>,
{
    tokio::time::timeout(limit, publish).await.map_err(|_| {
        ControlPlaneError::Timeout(format!(
            "发布事件 {routing_key} 超过 {limit:?} 未完成"
        ))
    })?
}

/// 连接超时
pub(crate) fn connect_timeout(config: &RabbitMqConfig) -> Duration {
    Duration::from_secs(config.connect_timeout_seconds.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use control_plane_testing_utils::RecordingEventHandler;

    #[tokio::test]
    async fn test_handle_delivery_acks_success() {
        let registry = HandlerRegistry::new();
        let handler = Arc::new(RecordingEventHandler::new("email"));
        registry
            .register(EventType::ForgetPassword, handler.clone())
            .await;

        let event = ApplicationEvent::forget_password("a@b.c", "hi", "body");
        let data = serde_json::to_vec(&event.to_envelope().unwrap()).unwrap();

        assert_eq!(handle_delivery(&registry, &data).await, DeliveryOutcome::Ack);
        assert_eq!(handler.events(), vec![event]);
    }

    #[tokio::test]
    async fn test_handle_delivery_rejects_malformed() {
        let registry = HandlerRegistry::new();
        assert_eq!(
            handle_delivery(&registry, b"{not json").await,
            DeliveryOutcome::Reject
        );

        let unknown = br#"{"eventType":"order.created","payload":{}}"#;
        assert_eq!(
            handle_delivery(&registry, unknown).await,
            DeliveryOutcome::Reject
        );
    }

    #[tokio::test]
    async fn test_handle_delivery_requeues_only_retryable() {
        let event = ApplicationEvent::forget_password("a@b.c", "hi", "body");
        let data = serde_json::to_vec(&event.to_envelope().unwrap()).unwrap();

        let registry = HandlerRegistry::new();
        registry
            .register(
                EventType::ForgetPassword,
                Arc::new(RecordingEventHandler::failing("smtp", || {
                    ControlPlaneError::Network("connection refused".to_string())
                })),
            )
            .await;
        assert_eq!(
            handle_delivery(&registry, &data).await,
            DeliveryOutcome::Requeue
        );

        let registry = HandlerRegistry::new();
        registry
            .register(
                EventType::ForgetPassword,
                Arc::new(RecordingEventHandler::failing("email", || {
                    ControlPlaneError::validation_error("missing 'body' field")
                })),
            )
            .await;
        assert_eq!(
            handle_delivery(&registry, &data).await,
            DeliveryOutcome::Reject
        );
    }

    #[test]
    fn test_encode_sets_message_properties() {
        let event = ApplicationEvent::user_registered("7", "bob", "bob@example.com");
        let (payload, properties) = RabbitMqEventBus::encode(&event).unwrap();

        let envelope: EventEnvelope = serde_json::from_slice(&payload).unwrap();
        assert_eq!(envelope.event_type, "user.registered");
        assert_eq!(envelope.event_id, event.event_id());

        assert_eq!(properties.delivery_mode(), &Some(2));
        assert_eq!(
            properties.kind().as_ref().map(|k| k.as_str()),
            Some("user.registered")
        );
        assert_eq!(
            properties.message_id().as_ref().map(|id| id.as_str()),
            Some(event.event_id())
        );
    }

    #[test]
    fn test_nack_confirmation_is_an_error() {
        assert!(check_confirmation("user.registered", &Confirmation::Ack(None)).is_ok());
        assert!(check_confirmation("user.registered", &Confirmation::NotRequested).is_ok());

        let err = check_confirmation("user.registered", &Confirmation::Nack(None)).unwrap_err();
        assert!(matches!(err, ControlPlaneError::EventBus(_)));
    }

    #[tokio::test]
    async fn test_stalled_publish_times_out() {
        let stalled = std::future::pending::<ControlPlaneResult<()>>();
        let err = within_timeout(Duration::from_millis(20), "forget_password", stalled)
            .await
            .unwrap_err();
        assert!(matches!(err, ControlPlaneError::Timeout(_)));

        let quick = async { Ok(()) };
        assert!(within_timeout(Duration::from_millis(20), "forget_password", quick)
            .await
            .is_ok());
    }

    /// 记录确认调用的测试替身
    struct RecordingSettler {
        calls: std::sync::Mutex<Vec<(&'static str, bool)>>,
        settled: bool,
    }

    impl RecordingSettler {
        fn new(settled: bool) -> Self {
            Self {
                calls: std::sync::Mutex::new(Vec::new()),
                settled,
            }
        }

        fn calls(&self) -> Vec<(&'static str, bool)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeliverySettler for RecordingSettler {
        async fn ack(&self, _options: BasicAckOptions) -> lapin::Result<bool> {
            self.calls.lock().unwrap().push(("ack", false));
            Ok(self.settled)
        }

        async fn nack(&self, options: BasicNackOptions) -> lapin::Result<bool> {
            self.calls.lock().unwrap().push(("nack", options.requeue));
            Ok(self.settled)
        }
    }

    #[tokio::test]
    async fn test_settle_maps_outcome_to_ack_or_nack() {
        let settler = RecordingSettler::new(true);

        settle(&settler, DeliveryOutcome::Ack).await.unwrap();
        settle(&settler, DeliveryOutcome::Requeue).await.unwrap();
        settle(&settler, DeliveryOutcome::Reject).await.unwrap();

        assert_eq!(
            settler.calls(),
            vec![("ack", false), ("nack", true), ("nack", false)]
        );
    }

    #[tokio::test]
    async fn test_settle_tolerates_already_settled_delivery() {
        let settler = RecordingSettler::new(false);

        assert!(settle(&settler, DeliveryOutcome::Ack).await.is_ok());
        assert!(settle(&settler, DeliveryOutcome::Reject).await.is_ok());
        assert_eq!(settler.calls().len(), 2);
    }
}
