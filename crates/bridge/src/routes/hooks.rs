//! Media server event hooks

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use std::sync::Arc;
use stream_manager::{EventKind, StreamEvent};
use tracing::warn;

use crate::AppState;

/// `POST /hooks/:cam/:event`
pub async fn post_event(
    State(state): State<Arc<AppState>>,
    Path((cam, event)): Path<(String, String)>,
) -> (StatusCode, String) {
    let kind = match event.parse::<EventKind>() {
        Ok(kind) => kind,
        Err(e) => return (StatusCode::BAD_REQUEST, e),
    };
    let uri = cam.to_uppercase();
    if state.manager.get(&uri).await.is_none() {
        return (StatusCode::NOT_FOUND, format!("unknown stream '{cam}'"));
    }

    match state.manager.events().try_send(StreamEvent::new(uri, kind)) {
        Ok(()) => (StatusCode::ACCEPTED, kind.to_string()),
        Err(e) => {
            warn!("[API] Dropping {} event for {}: {}", kind, cam, e);
            (StatusCode::SERVICE_UNAVAILABLE, "event queue is full".to_string())
        }
    }
}
