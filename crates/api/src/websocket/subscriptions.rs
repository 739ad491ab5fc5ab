use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use control_plane_core::{ExecutionLogNotifier, TaskExecutionLog, TaskExecutionLogRepository};

use super::connection::{ConnectionHandle, ConnectionToken};
use super::messages::{LogStreamMessage, SubscribeRequest};

struct SubscriptionRecord {
    handle: ConnectionHandle,
    task_ids: HashSet<i64>,
}

/// 执行日志订阅管理器
///
/// 以连接令牌为键保存每个连接订阅的任务集合。新日志只推送给订阅了
/// 对应任务的连接，写入单个连接失败只记录日志，不影响其他连接。
pub struct LogSubscriptionManager {
    log_repo: Arc<dyn TaskExecutionLogRepository>,
    subscriptions: RwLock<HashMap<ConnectionToken, SubscriptionRecord>>,
}

impl LogSubscriptionManager {
    pub fn new(log_repo: Arc<dyn TaskExecutionLogRepository>) -> Self {
        Self {
            log_repo,
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// 为新连接创建空的订阅记录
    pub async fn register(&self, handle: ConnectionHandle) -> ConnectionToken {
        let token = handle.token();
        self.subscriptions.write().await.insert(
            token,
            SubscriptionRecord {
                handle,
                task_ids: HashSet::new(),
            },
        );
        debug!(connection = %token, "日志订阅连接已注册");
        token
    }

    pub async fn unregister(&self, token: ConnectionToken) {
        if self.subscriptions.write().await.remove(&token).is_some() {
            debug!(connection = %token, "日志订阅连接已移除");
        }
    }

    /// 处理一条上行文本消息，格式错误时回复错误消息并保持连接
    pub async fn handle_text(&self, token: ConnectionToken, text: &str) {
        match serde_json::from_str::<SubscribeRequest>(text) {
            Ok(request) => self.subscribe(token, request).await,
            Err(e) => {
                debug!(connection = %token, "无法解析订阅请求: {}", e);
                self.send_to(token, &LogStreamMessage::error(format!("无效的订阅请求: {e}")))
                    .await;
            }
        }
    }

    /// 记录订阅并回放最近的日志
    ///
    /// 先登记订阅再在锁外读取历史日志，读取期间写入的日志不会丢失，
    /// 但可能先以 `log_update` 到达并同时出现在随后的 `logs` 中，客户端按日志ID去重。
    pub async fn subscribe(&self, token: ConnectionToken, request: SubscribeRequest) {
        let handle = {
            let mut subscriptions = self.subscriptions.write().await;
            let Some(record) = subscriptions.get_mut(&token) else {
                warn!(connection = %token, "连接未注册，忽略订阅请求");
                return;
            };
            record.task_ids.insert(request.task_id);
            record.handle.clone()
        };
        info!(connection = %token, task_id = request.task_id, "订阅任务执行日志");

        let message = match self
            .log_repo
            .list_execution_logs(request.task_id, request.effective_limit())
            .await
        {
            Ok(logs) => LogStreamMessage::Logs { data: logs },
            Err(e) => {
                warn!(task_id = request.task_id, "获取历史日志失败: {}", e);
                LogStreamMessage::error(format!("获取历史日志失败: {e}"))
            }
        };
        let _ = handle.push_json(&message);
    }

    pub async fn connection_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    pub async fn subscribed_tasks(&self, token: ConnectionToken) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .subscriptions
            .read()
            .await
            .get(&token)
            .map(|record| record.task_ids.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    async fn send_to(&self, token: ConnectionToken, message: &LogStreamMessage) {
        let handle = self
            .subscriptions
            .read()
            .await
            .get(&token)
            .map(|record| record.handle.clone());
        if let Some(handle) = handle {
            let _ = handle.push_json(message);
        }
    }
}

#[async_trait]
impl ExecutionLogNotifier for LogSubscriptionManager {
    async fn notify_log(&self, task_id: i64, log: &TaskExecutionLog) {
        let message = LogStreamMessage::LogUpdate {
            task_id,
            data: log.clone(),
        };
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                warn!(task_id, "序列化日志通知失败: {}", e);
                return;
            }
        };

        let subscriptions = self.subscriptions.read().await;
        let mut delivered = 0usize;
        for record in subscriptions.values() {
            if record.task_ids.contains(&task_id) && record.handle.push(text.clone()).is_ok() {
                delivered += 1;
            }
        }
        debug!(task_id, delivered, "执行日志已推送");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use control_plane_core::{ControlPlaneResult, NewExecutionLog};
    use control_plane_testing_utils::{ExecutionLogBuilder, MockExecutionLogRepository};
    use serde_json::Value;
    use tokio::sync::{mpsc, Notify};

    fn manager_with_logs(logs: Vec<TaskExecutionLog>) -> (LogSubscriptionManager, Arc<MockExecutionLogRepository>) {
        let repo = Arc::new(MockExecutionLogRepository::with_logs(logs));
        (LogSubscriptionManager::new(repo.clone()), repo)
    }

    async fn connect(manager: &LogSubscriptionManager) -> (ConnectionToken, mpsc::Receiver<String>) {
        let (handle, rx) = ConnectionHandle::new(16);
        (manager.register(handle).await, rx)
    }

    fn next_json(rx: &mut mpsc::Receiver<String>) -> Value {
        let text = rx.try_recv().expect("应收到消息");
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_serves_backlog_most_recent_first() {
        let logs = (1..=8)
            .map(|id| ExecutionLogBuilder::new().with_id(id).with_task_id(7).build())
            .collect();
        let (manager, _) = manager_with_logs(logs);
        let (token, mut rx) = connect(&manager).await;

        manager.handle_text(token, r#"{"taskId":7,"limit":5}"#).await;

        let message = next_json(&mut rx);
        assert_eq!(message["type"], "logs");
        let ids: Vec<i64> = message["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|log| log["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![8, 7, 6, 5, 4]);
        assert_eq!(manager.subscribed_tasks(token).await, vec![7]);
    }

    #[tokio::test]
    async fn test_live_updates_are_targeted() {
        let (manager, _) = manager_with_logs(Vec::new());
        let (seven, mut rx_seven) = connect(&manager).await;
        let (eight, mut rx_eight) = connect(&manager).await;

        manager.handle_text(seven, r#"{"taskId":7}"#).await;
        manager.handle_text(eight, r#"{"taskId":8}"#).await;
        next_json(&mut rx_seven);
        next_json(&mut rx_eight);

        let log = ExecutionLogBuilder::new().with_id(42).with_task_id(7).build();
        manager.notify_log(7, &log).await;

        let message = next_json(&mut rx_seven);
        assert_eq!(message["type"], "log_update");
        assert_eq!(message["taskId"], 7);
        assert_eq!(message["data"]["id"], 42);
        assert!(rx_eight.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_request_gets_error_reply() {
        let (manager, _) = manager_with_logs(Vec::new());
        let (token, mut rx) = connect(&manager).await;

        manager.handle_text(token, "{not json").await;
        let message = next_json(&mut rx);
        assert_eq!(message["type"], "error");
        assert!(message["error"].is_string());

        assert_eq!(manager.connection_count().await, 1);
        assert!(manager.subscribed_tasks(token).await.is_empty());
    }

    #[tokio::test]
    async fn test_backlog_failure_sends_error() {
        let (manager, repo) = manager_with_logs(Vec::new());
        repo.fail_reads(true);
        let (token, mut rx) = connect(&manager).await;

        manager.handle_text(token, r#"{"taskId":7}"#).await;
        assert_eq!(next_json(&mut rx)["type"], "error");
        assert_eq!(manager.subscribed_tasks(token).await, vec![7]);
    }

    #[tokio::test]
    async fn test_closed_connection_does_not_block_others() {
        let (manager, _) = manager_with_logs(Vec::new());
        let (gone, rx_gone) = connect(&manager).await;
        let (alive, mut rx_alive) = connect(&manager).await;
        manager.handle_text(gone, r#"{"taskId":1}"#).await;
        manager.handle_text(alive, r#"{"taskId":1}"#).await;
        drop(rx_gone);
        next_json(&mut rx_alive);

        let log = ExecutionLogBuilder::new().with_task_id(1).build();
        manager.notify_log(1, &log).await;
        assert_eq!(next_json(&mut rx_alive)["type"], "log_update");

        manager.unregister(gone).await;
        manager.unregister(gone).await;
        assert_eq!(manager.connection_count().await, 1);
    }

    /// 读取历史日志时暂停，直到测试放行
    struct PausingLogRepository {
        inner: MockExecutionLogRepository,
        paused: Notify,
        release: Notify,
    }

    #[async_trait]
    impl TaskExecutionLogRepository for PausingLogRepository {
        async fn append_execution_log(
            &self,
            entry: &NewExecutionLog,
        ) -> ControlPlaneResult<TaskExecutionLog> {
            self.inner.append_execution_log(entry).await
        }

        async fn list_execution_logs(
            &self,
            task_id: i64,
            limit: i64,
        ) -> ControlPlaneResult<Vec<TaskExecutionLog>> {
            self.paused.notify_one();
            self.release.notified().await;
            self.inner.list_execution_logs(task_id, limit).await
        }

        async fn delete_logs_before(&self, cutoff: DateTime<Utc>) -> ControlPlaneResult<u64> {
            self.inner.delete_logs_before(cutoff).await
        }
    }

    #[tokio::test]
    async fn test_log_written_during_backlog_fetch_is_not_missed() {
        let repo = Arc::new(PausingLogRepository {
            inner: MockExecutionLogRepository::new(),
            paused: Notify::new(),
            release: Notify::new(),
        });
        let manager = Arc::new(LogSubscriptionManager::new(repo.clone()));
        let (token, mut rx) = connect(&manager).await;

        let subscribe = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.handle_text(token, r#"{"taskId":7}"#).await })
        };
        repo.paused.notified().await;

        let log = ExecutionLogBuilder::new().with_id(3).with_task_id(7).build();
        manager.notify_log(7, &log).await;
        repo.release.notify_one();
        subscribe.await.unwrap();

        let first = next_json(&mut rx);
        assert_eq!(first["type"], "log_update");
        assert_eq!(first["data"]["id"], 3);
        assert_eq!(next_json(&mut rx)["type"], "logs");
    }
}
