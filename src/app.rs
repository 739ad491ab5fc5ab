use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use control_plane_api::{create_app, websocket::LogSubscriptionManager, AppState};
use control_plane_core::{
    AppConfig, EventBus, EventBusKind, EventType, ExecutionLogNotifier, TaskControlService,
    TaskExecutionLogRepository, TaskRepository,
};
use control_plane_dispatcher::{ExecutorRegistry, TaskController, TaskRegistry, TaskRunner};
use control_plane_infrastructure::{
    DatabaseManager, EmailEventHandler, EventBusFactory, LoggingEmailSender,
    SqliteTaskExecutionLogRepository, SqliteTaskRepository,
};
use tokio::{net::TcpListener, sync::broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行调度器
    Scheduler,
    /// 仅运行REST和WebSocket服务
    Api,
    /// 按配置运行所有组件
    All,
}

impl AppMode {
    fn runs_scheduler(self, config: &AppConfig) -> bool {
        match self {
            AppMode::Scheduler => true,
            AppMode::Api => false,
            AppMode::All => config.scheduler.enabled,
        }
    }

    fn runs_api(self, config: &AppConfig) -> bool {
        match self {
            AppMode::Scheduler => false,
            AppMode::Api => true,
            AppMode::All => config.api.enabled,
        }
    }
}

/// 主应用程序
///
/// 组装仓储、调度器、事件总线和API。同一进程内调度器与API共享
/// 日志订阅管理器，执行日志写入后直接推送给订阅的连接。
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    database: DatabaseManager,
    task_repo: Arc<dyn TaskRepository>,
    log_repo: Arc<dyn TaskExecutionLogRepository>,
    subscriptions: Arc<LogSubscriptionManager>,
    registry: Option<Arc<TaskRegistry>>,
    event_bus: Arc<dyn EventBus>,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        let database = DatabaseManager::new(&config.database).await?;
        database
            .run_migrations()
            .await
            .context("运行数据库迁移失败")?;

        let task_repo: Arc<dyn TaskRepository> =
            Arc::new(SqliteTaskRepository::new(database.pool().clone()));
        let log_repo: Arc<dyn TaskExecutionLogRepository> =
            Arc::new(SqliteTaskExecutionLogRepository::new(database.pool().clone()));
        let subscriptions = Arc::new(LogSubscriptionManager::new(log_repo.clone()));

        let registry = if mode.runs_scheduler(&config) {
            let executor = Arc::new(ExecutorRegistry::with_builtins(log_repo.clone()));
            let mut runner = TaskRunner::new(executor, task_repo.clone(), log_repo.clone());
            if mode.runs_api(&config) {
                let notifier: Arc<dyn ExecutionLogNotifier> = subscriptions.clone();
                runner = runner.with_notifier(notifier);
            }
            Some(Arc::new(TaskRegistry::new(task_repo.clone(), Arc::new(runner))))
        } else {
            None
        };

        let event_bus = create_event_bus(&config).await?;

        Ok(Self {
            config,
            mode,
            database,
            task_repo,
            log_repo,
            subscriptions,
            registry,
            event_bus,
        })
    }

    /// 运行直到收到关闭信号，然后按顺序关闭各组件
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        if let Some(registry) = &self.registry {
            registry.start().await.context("启动调度器失败")?;
        }

        let connections = CancellationToken::new();
        let server = if self.mode.runs_api(&self.config) {
            Some(self.spawn_api(connections.clone()).await?)
        } else {
            None
        };

        let _ = shutdown_rx.recv().await;
        info!("应用程序收到关闭信号");

        // 先停止接收新连接并关闭WebSocket
        connections.cancel();
        if let Some(server) = server {
            if let Err(e) = server.await {
                error!("API服务器任务异常退出: {e}");
            }
            info!("API服务器已停止");
        }

        if let Some(registry) = &self.registry {
            let grace = Duration::from_secs(self.config.scheduler.shutdown_grace_seconds);
            if !registry.shutdown(grace).await {
                warn!("部分任务在关闭等待时间内未结束");
            }
        }

        if let Err(e) = self.event_bus.close().await {
            warn!("关闭事件总线失败: {e}");
        }

        self.database.close().await;
        info!("应用程序已停止");
        Ok(())
    }

    async fn spawn_api(
        &self,
        connections: CancellationToken,
    ) -> Result<tokio::task::JoinHandle<()>> {
        let controller: Arc<dyn TaskControlService> = match &self.registry {
            Some(registry) => Arc::new(TaskController::new(
                self.task_repo.clone(),
                registry.clone(),
            )),
            None => Arc::new(TaskController::detached(self.task_repo.clone())),
        };

        let state = AppState::new(
            self.task_repo.clone(),
            self.log_repo.clone(),
            controller,
            self.event_bus.clone(),
            self.subscriptions.clone(),
        )
        .with_shutdown(connections.clone())
        .with_websocket_buffer(self.config.api.websocket_buffer);
        let app = create_app(state, self.config.api.cors_enabled);

        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;
        info!("API服务器启动在 http://{}", self.config.api.bind_address);

        Ok(tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { connections.cancelled().await })
                .await;
            if let Err(e) = result {
                error!("API服务器运行失败: {e}");
            }
        }))
    }
}

/// 创建事件总线并注册内置处理器
async fn create_event_bus(config: &AppConfig) -> Result<Arc<dyn EventBus>> {
    if config.event_bus.kind == EventBusKind::RabbitMq {
        info!("连接消息队列: {}", config.event_bus.rabbitmq.masked_url());
    }
    let event_bus = EventBusFactory::create(&config.event_bus).await;

    event_bus
        .subscribe(
            EventType::ForgetPassword,
            Arc::new(EmailEventHandler::new(Arc::new(LoggingEmailSender))),
        )
        .await
        .context("注册邮件事件处理器失败")?;

    info!("事件总线已就绪: {}", event_bus.kind());
    Ok(event_bus)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_memory_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.database.url = "sqlite::memory:".to_string();
        config.api.bind_address = "127.0.0.1:0".to_string();
        config
    }

    #[test]
    fn test_mode_components() {
        let mut config = AppConfig::default();
        assert!(AppMode::Scheduler.runs_scheduler(&config));
        assert!(!AppMode::Scheduler.runs_api(&config));
        assert!(!AppMode::Api.runs_scheduler(&config));
        assert!(AppMode::All.runs_scheduler(&config) && AppMode::All.runs_api(&config));

        config.scheduler.enabled = false;
        assert!(!AppMode::All.runs_scheduler(&config));
    }

    #[tokio::test]
    async fn test_api_mode_has_no_scheduler() {
        let app = Application::new(in_memory_config(), AppMode::Api).await.unwrap();
        assert!(app.registry.is_none());
        assert_eq!(app.event_bus.kind(), EventBusKind::InMemory);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_signal() {
        let app = Application::new(in_memory_config(), AppMode::All).await.unwrap();
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move { app.run(rx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }
}
