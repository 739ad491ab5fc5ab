use axum::{extract::State, response::IntoResponse};
use serde_json::json;

use crate::{response::success, routes::AppState};

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    success(json!({
        "status": "ok",
        "service": "control-plane",
        "version": env!("CARGO_PKG_VERSION"),
        "event_bus": state.event_bus.kind().to_string(),
        "active_triggers": state.task_controller.active_task_ids().await.len(),
    }))
}
