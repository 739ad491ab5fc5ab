use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::connection::{ConnectionHandle, ConnectionToken};

/// 一个在线设备
#[derive(Debug, Clone)]
pub struct PresenceSession {
    pub handle: ConnectionHandle,
    pub connected_at: DateTime<Utc>,
}

/// 用户在线状态表
///
/// 以 (用户, 设备) 为键，同一设备重复连接时替换旧会话。
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<i64, HashMap<String, PresenceSession>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册会话，返回被替换的旧会话
    pub async fn add_session(
        &self,
        user_id: i64,
        device_id: &str,
        handle: ConnectionHandle,
    ) -> Option<PresenceSession> {
        let session = PresenceSession {
            handle,
            connected_at: Utc::now(),
        };
        let replaced = self
            .sessions
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(device_id.to_string(), session);

        info!(user_id, device_id, replaced = replaced.is_some(), "用户设备上线");
        replaced
    }

    /// 移除会话，不存在时不做任何操作
    pub async fn remove_session(&self, user_id: i64, device_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        let removed = match sessions.get_mut(&user_id) {
            Some(devices) => {
                let removed = devices.remove(device_id).is_some();
                if devices.is_empty() {
                    sessions.remove(&user_id);
                }
                removed
            }
            None => false,
        };
        if removed {
            info!(user_id, device_id, "用户设备下线");
        }
        removed
    }

    /// 只有当前会话仍属于该连接时才移除，旧连接断开不会挤掉替换它的新连接
    pub async fn remove_session_if(
        &self,
        user_id: i64,
        device_id: &str,
        token: ConnectionToken,
    ) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(devices) = sessions.get_mut(&user_id) else {
            return false;
        };
        if devices
            .get(device_id)
            .is_some_and(|session| session.handle.token() == token)
        {
            devices.remove(device_id);
            if devices.is_empty() {
                sessions.remove(&user_id);
            }
            info!(user_id, device_id, "用户设备下线");
            true
        } else {
            debug!(user_id, device_id, connection = %token, "会话已被替换，跳过移除");
            false
        }
    }

    pub async fn is_online(&self, user_id: i64, device_id: &str) -> bool {
        self.sessions
            .read()
            .await
            .get(&user_id)
            .is_some_and(|devices| devices.contains_key(device_id))
    }

    pub async fn devices_of(&self, user_id: i64) -> Vec<String> {
        let mut devices: Vec<String> = self
            .sessions
            .read()
            .await
            .get(&user_id)
            .map(|devices| devices.keys().cloned().collect())
            .unwrap_or_default();
        devices.sort();
        devices
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.values().map(HashMap::len).sum()
    }
}
