use axum::{
    extract::{
        rejection::QueryRejection,
        ws::{
            close_code, rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket,
            WebSocketUpgrade,
        },
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::{ConnectionHandle, ConnectionToken};
use crate::error::ApiError;
use crate::routes::AppState;

/// 在线状态连接参数
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceQuery {
    pub user_id: Option<i64>,
    pub device_id: Option<String>,
}

/// `GET /ws/scheduleLog`
pub async fn schedule_log_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_log_stream(socket, state))
}

/// `GET /ws/user/status?userId=&deviceId=`
pub async fn user_status_ws(
    State(state): State<AppState>,
    query: Result<Query<PresenceQuery>, QueryRejection>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(e) => return ApiError::BadRequest(e.body_text()).into_response(),
    };
    let Some(user_id) = query.user_id else {
        return ApiError::BadRequest("缺少参数 userId".to_string()).into_response();
    };
    let device_id = match query.device_id {
        Some(device_id) if !device_id.trim().is_empty() => device_id,
        _ => {
            warn!(user_id, "在线状态连接缺少设备ID");
            return ApiError::BadRequest("缺少参数 deviceId".to_string()).into_response();
        }
    };

    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| serve_presence(socket, user_id, device_id, state)),
        Err(rejection) => rejection.into_response(),
    }
}

async fn serve_log_stream(socket: WebSocket, state: AppState) {
    let (handle, outgoing) = ConnectionHandle::new(state.websocket_buffer);
    let token = state.subscriptions.register(handle.clone()).await;
    info!(connection = %token, "日志订阅连接已建立");

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(forward_outgoing(sink, outgoing, state.shutdown.clone()));
    drop(handle);

    let subscriptions = state.subscriptions.clone();
    read_loop(stream, token, &state.shutdown, |text| {
        let subscriptions = subscriptions.clone();
        async move { subscriptions.handle_text(token, &text).await }
    })
    .await;

    state.subscriptions.unregister(token).await;
    let _ = writer.await;
    info!(connection = %token, "日志订阅连接已断开");
}

async fn serve_presence(socket: WebSocket, user_id: i64, device_id: String, state: AppState) {
    let (handle, outgoing) = ConnectionHandle::new(state.websocket_buffer);
    let token = handle.token();
    if let Some(replaced) = state
        .sessions
        .add_session(user_id, &device_id, handle)
        .await
    {
        debug!(user_id, device_id = %device_id, old = %replaced.handle.token(), "同一设备重复连接，旧会话被替换");
    }

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(forward_outgoing(sink, outgoing, state.shutdown.clone()));

    read_loop(stream, token, &state.shutdown, |text| async move {
        debug!(connection = %token, "收到在线状态消息: {}", text);
    })
    .await;

    state
        .sessions
        .remove_session_if(user_id, &device_id, token)
        .await;
    let _ = writer.await;
}

/// 读取上行消息直到连接关闭或服务停止
async fn read_loop<F, Fut>(
    mut stream: SplitStream<WebSocket>,
    token: ConnectionToken,
    shutdown: &CancellationToken,
    mut on_text: F,
) where
    F: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => on_text(text.to_string()).await,
            Some(Ok(Message::Binary(_))) => {
                debug!(connection = %token, "忽略二进制消息");
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(connection = %token, "读取WebSocket消息失败: {}", e);
                break;
            }
        }
    }
}

/// 把发送通道中的消息转发到套接字，服务停止时发送关闭帧
async fn forward_outgoing(
    mut sink: SplitSink<WebSocket, Message>,
    mut outgoing: mpsc::Receiver<String>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                let frame = CloseFrame {
                    code: close_code::AWAY,
                    reason: "服务器关闭".into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                break;
            }
            message = outgoing.recv() => match message {
                Some(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break;
                }
            },
        }
    }
}

