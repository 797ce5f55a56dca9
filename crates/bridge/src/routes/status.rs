//! Health, status and metrics

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use stream_manager::StreamInfo;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: i64,
    pub version: String,
    pub uptime_seconds: u64,
    pub streams: usize,
    pub enabled: usize,
    pub mqtt: bool,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().timestamp(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        streams: state.manager.total().await,
        enabled: state.manager.active().await,
        mqtt: state.mqtt.as_ref().is_some_and(|m| m.is_active()),
    })
}

/// Status and motion flag per stream
pub async fn status(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, StreamInfo>> {
    Json(state.manager.status().await)
}

/// Prometheus exposition
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed".to_string()),
    }
}
