//! WebSocket连接句柄
//!
//! 每个连接拥有一个有界发送通道，由独立的写任务转发到套接字。
//! 管理器只持有句柄，推送使用 `try_send`，不会在持锁时等待慢连接。

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{error, warn};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// 连接的稳定标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionToken(u64);

impl ConnectionToken {
    pub fn next() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// 推送失败的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// 发送缓冲区已满，消息被丢弃
    Full,
    /// 连接已关闭
    Closed,
}

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    token: ConnectionToken,
    sender: mpsc::Sender<String>,
}

impl ConnectionHandle {
    /// 创建句柄和写任务使用的接收端
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let handle = Self {
            token: ConnectionToken::next(),
            sender,
        };
        (handle, receiver)
    }

    pub fn token(&self) -> ConnectionToken {
        self.token
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn push(&self, text: String) -> Result<(), PushError> {
        match self.sender.try_send(text) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(connection = %self.token, "连接发送缓冲区已满，丢弃消息");
                Err(PushError::Full)
            }
            Err(TrySendError::Closed(_)) => {
                warn!(connection = %self.token, "连接已关闭，消息未送达");
                Err(PushError::Closed)
            }
        }
    }

    pub fn push_json<T: Serialize>(&self, message: &T) -> Result<(), PushError> {
        match serde_json::to_string(message) {
            Ok(text) => self.push(text),
            Err(e) => {
                error!(connection = %self.token, "序列化WebSocket消息失败: {}", e);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique() {
        let a = ConnectionToken::next();
        let b = ConnectionToken::next();
        assert_ne!(a, b);
        assert!(b.value() > a.value());
        assert!(a.to_string().starts_with("conn-"));
    }

    #[tokio::test]
    async fn test_push_reports_full_and_closed() {
        let (handle, mut rx) = ConnectionHandle::new(1);
        assert_eq!(handle.push("first".to_string()), Ok(()));
        assert_eq!(handle.push("second".to_string()), Err(PushError::Full));
        assert_eq!(rx.recv().await.as_deref(), Some("first"));

        drop(rx);
        assert!(handle.is_closed());
        assert_eq!(handle.push("third".to_string()), Err(PushError::Closed));
    }
}
