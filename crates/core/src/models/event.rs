use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{ControlPlaneError, ControlPlaneResult};

/// 事件类型
///
/// 路由键与订阅键都使用 [`EventType::as_str`] 的取值。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "user.registered")]
    UserRegistered,
    #[serde(rename = "user.forget_password")]
    ForgetPassword,
}

impl EventType {
    pub const ALL: [EventType; 2] = [EventType::UserRegistered, EventType::ForgetPassword];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UserRegistered => "user.registered",
            EventType::ForgetPassword => "user.forget_password",
        }
    }
}

impl FromStr for EventType {
    type Err = ControlPlaneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ControlPlaneError::UnknownEventType(s.to_string()))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 用户注册事件载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRegisteredPayload {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub username: String,
    pub email: String,
    #[serde(rename = "registeredAt")]
    pub registered_at: DateTime<Utc>,
}

/// 忘记密码事件载荷
///
/// 字段缺失时反序列化为空字符串，由处理器负责校验。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ForgetPasswordPayload {
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    UserRegistered(UserRegisteredPayload),
    ForgetPassword(ForgetPasswordPayload),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::UserRegistered(_) => EventType::UserRegistered,
            EventPayload::ForgetPassword(_) => EventType::ForgetPassword,
        }
    }
}

/// 应用事件
///
/// 不可变的值对象，由发布方持有并交给事件总线。
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationEvent {
    event_id: String,
    timestamp: DateTime<Utc>,
    payload: EventPayload,
}

impl ApplicationEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn user_registered(
        user_id: impl Into<String>,
        username: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp: now,
            payload: EventPayload::UserRegistered(UserRegisteredPayload {
                user_id: user_id.into(),
                username: username.into(),
                email: email.into(),
                registered_at: now,
            }),
        }
    }

    pub fn forget_password(
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::new(EventPayload::ForgetPassword(ForgetPasswordPayload {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        }))
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// 扁平的字段名到值的映射
    pub fn payload_map(&self) -> ControlPlaneResult<Map<String, Value>> {
        let value = match &self.payload {
            EventPayload::UserRegistered(p) => serde_json::to_value(p)?,
            EventPayload::ForgetPassword(p) => serde_json::to_value(p)?,
        };
        match value {
            Value::Object(map) => Ok(map),
            other => Err(ControlPlaneError::Serialization(format!(
                "事件载荷不是对象: {other}"
            ))),
        }
    }

    pub fn to_envelope(&self) -> ControlPlaneResult<EventEnvelope> {
        Ok(EventEnvelope {
            event_id: self.event_id.clone(),
            event_type: self.event_type().as_str().to_string(),
            timestamp: self.timestamp,
            payload: self.payload_map()?,
        })
    }

    /// 从线上信封还原强类型事件
    pub fn from_envelope(envelope: EventEnvelope) -> ControlPlaneResult<Self> {
        let event_type: EventType = envelope.event_type.parse()?;
        let payload = Value::Object(envelope.payload);

        let payload = match event_type {
            EventType::UserRegistered => serde_json::from_value(payload)
                .map(EventPayload::UserRegistered)
                .map_err(|e| {
                    ControlPlaneError::validation_error(format!("用户注册事件载荷无效: {e}"))
                })?,
            EventType::ForgetPassword => serde_json::from_value(payload)
                .map(EventPayload::ForgetPassword)
                .map_err(|e| {
                    ControlPlaneError::validation_error(format!("忘记密码事件载荷无效: {e}"))
                })?,
        };

        let event_id = if envelope.event_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            envelope.event_id
        };

        Ok(Self {
            event_id,
            timestamp: envelope.timestamp,
            payload,
        })
    }
}

/// 事件的线上格式
///
/// 只在反序列化边界使用，随后立即转换为 [`ApplicationEvent`]。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    #[serde(default)]
    pub event_id: String,
    pub event_type: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Map<String, Value>,
}
