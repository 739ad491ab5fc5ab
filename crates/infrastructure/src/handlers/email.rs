use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use control_plane_core::{
    ApplicationEvent, ControlPlaneError, ControlPlaneResult, EventHandler, EventPayload,
};

/// 未指定主题时使用的默认主题
pub const DEFAULT_RESET_SUBJECT: &str = "密码重置";

/// 邮件发送端口，实际的邮件传输由外部系统提供
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> ControlPlaneResult<()>;
}

/// 只记录日志的邮件发送实现
#[derive(Debug, Default)]
pub struct LoggingEmailSender;

#[async_trait]
impl EmailSender for LoggingEmailSender {
    async fn send(&self, to: &str, subject: &str, body: &str) -> ControlPlaneResult<()> {
        info!(to, subject, body_len = body.len(), "发送邮件");
        Ok(())
    }
}

/// 忘记密码邮件处理器
pub struct EmailEventHandler {
    sender: Arc<dyn EmailSender>,
}

impl EmailEventHandler {
    pub fn new(sender: Arc<dyn EmailSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl EventHandler for EmailEventHandler {
    fn name(&self) -> &str {
        "email"
    }

    async fn handle(&self, event: &ApplicationEvent) -> ControlPlaneResult<()> {
        let EventPayload::ForgetPassword(payload) = event.payload() else {
            debug!("邮件处理器忽略事件: {}", event.event_type());
            return Ok(());
        };

        if payload.to.trim().is_empty() {
            return Err(ControlPlaneError::validation_error("missing 'to' field"));
        }
        if payload.body.is_empty() {
            return Err(ControlPlaneError::validation_error("missing 'body' field"));
        }
        let subject = if payload.subject.trim().is_empty() {
            DEFAULT_RESET_SUBJECT
        } else {
            payload.subject.as_str()
        };

        self.sender.send(&payload.to, subject, &payload.body).await?;
        info!(event_id = event.event_id(), "密码重置邮件已发送: {}", payload.to);
        Ok(())
    }
}
