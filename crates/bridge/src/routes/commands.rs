//! Camera command routes

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use std::sync::Arc;
use stream_manager::CommandResult;
use tracing::debug;

use crate::AppState;

fn respond(result: CommandResult) -> (StatusCode, Json<CommandResult>) {
    let code = match result.response.as_ref().and_then(Value::as_str) {
        Some("Camera not found") if !result.is_success() => StatusCode::NOT_FOUND,
        _ => StatusCode::OK,
    };
    (code, Json(result))
}

/// `GET /api/:cam/:cmd`
pub async fn get_command(
    State(state): State<Arc<AppState>>,
    Path((cam, cmd)): Path<(String, String)>,
) -> (StatusCode, Json<CommandResult>) {
    debug!("[API] {} {}", cam, cmd);
    respond(state.manager.send_cmd(&cam.to_uppercase(), &cmd, Value::Null).await)
}

/// `POST /api/:cam/:cmd`; the body is the command payload
pub async fn post_command(
    State(state): State<Arc<AppState>>,
    Path((cam, cmd)): Path<(String, String)>,
    body: Bytes,
) -> (StatusCode, Json<CommandResult>) {
    let payload = automation::parse_payload(&body);
    debug!("[API] {} {} {}", cam, cmd, payload);
    respond(state.manager.send_cmd(&cam.to_uppercase(), &cmd, payload).await)
}
