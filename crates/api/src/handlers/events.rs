use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tracing::info;

use control_plane_core::{ApplicationEvent, EventEnvelope};

use crate::{
    error::{ApiError, ApiResult},
    response::ApiResponse,
    routes::AppState,
};

/// 通过事件总线发布事件
///
/// 内存总线上处理器的校验错误会以400返回给调用方。
pub async fn publish_event(
    State(state): State<AppState>,
    request: Result<Json<EventEnvelope>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(envelope) = request.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let event = ApplicationEvent::from_envelope(envelope)?;
    let event_id = event.event_id().to_string();
    let event_type = event.event_type();

    state.event_bus.publish(event).await?;
    info!(event_id = %event_id, "事件已发布: {}", event_type);

    Ok((
        StatusCode::ACCEPTED,
        ApiResponse::success(json!({
            "eventId": event_id,
            "eventType": event_type.as_str(),
        })),
    ))
}
