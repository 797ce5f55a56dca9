//! Camera Bridge Service
//!
//! Configuration, device directory, HTTP command API and the wiring that
//! connects cameras to the stream manager and the automation bridge.

use automation::MqttBridge;
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Instant;
use stream_manager::StreamManager;
use tower::ServiceBuilder;
use tower_governor::GovernorLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod cache;
pub mod config;
pub mod directory;
pub mod health;
pub mod logging;
pub mod rate_limit;
mod routes;

use rate_limit::DefaultGovernorConfig;

/// Application state shared across handlers
pub struct AppState {
    pub manager: Arc<StreamManager>,
    pub mqtt: Option<Arc<MqttBridge>>,
    pub metrics: Option<PrometheusHandle>,
    pub version: String,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(manager: Arc<StreamManager>) -> Self {
        Self {
            manager,
            mqtt: None,
            metrics: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
        }
    }
}

/// Create the application router. Command and hook routes are rate
/// limited when `limiter` is set.
pub fn create_router(state: Arc<AppState>, limiter: Option<Arc<DefaultGovernorConfig>>) -> Router {
    let mut commands: Router<Arc<AppState>> = Router::new()
        .route(
            "/api/:cam/:cmd",
            get(routes::commands::get_command).post(routes::commands::post_command),
        )
        .route("/hooks/:cam/:event", post(routes::hooks::post_event));
    if let Some(config) = limiter {
        commands = commands.layer(GovernorLayer { config });
    }

    Router::new()
        .route("/api/health", get(routes::status::health))
        .route("/api/status", get(routes::status::status))
        .route("/metrics", get(routes::status::metrics))
        .merge(commands)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use ioctl_protocol::{Account, CameraClient, CapabilityTable, DeviceInfo, TcpConnector};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::time::Duration;
    use stream_manager::{CameraStream, ManagerConfig, NullPublisher, SnapshotCommand, StreamOptions};
    use tower::ServiceExt;

    async fn app() -> Router {
        let manager = Arc::new(StreamManager::new(
            ManagerConfig::default(),
            SnapshotCommand::new("true", Vec::new()),
            Arc::new(NullPublisher),
        ));
        let device = DeviceInfo {
            nickname: "Front Door".to_string(),
            product_model: "HL_CAM4".to_string(),
            mac: "D03F27AABBCC".to_string(),
            firmware_ver: None,
            enr: None,
            p2p_id: None,
            ip: None,
        };
        let account = Account {
            email: "user@example.com".to_string(),
            phone_id: "phone-1".to_string(),
            open_user_id: "open".to_string(),
        };
        let caps = Arc::new(CapabilityTable::bundled().unwrap());
        let connector = Arc::new(TcpConnector::new(HashMap::new(), Duration::from_millis(100)));
        let client = CameraClient::new(device, account, caps);
        manager
            .add(Arc::new(CameraStream::new(client, connector, StreamOptions::default())))
            .await;

        create_router(Arc::new(AppState::new(manager)), None)
    }

    async fn call(app: Router, method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or_else(|_| json!(String::from_utf8_lossy(&bytes)));
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(app().await, "GET", "/api/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["streams"], 1);
        assert_eq!(body["mqtt"], false);
    }

    #[tokio::test]
    async fn test_status() {
        let (status, body) = call(app().await, "GET", "/api/status", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["FRONT_DOOR"], json!({"status": "stopped", "motion": false}));
    }

    #[tokio::test]
    async fn test_commands() {
        let (status, body) = call(app().await, "GET", "/api/front_door/state", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["value"], "stopped");

        let (status, body) = call(app().await, "POST", "/api/nope/irled", "1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["response"], "Camera not found");

        // Unreachable camera reports an error result
        let (status, body) = call(app().await, "POST", "/api/front_door/irled", "on").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_hooks() {
        let (status, _) = call(app().await, "POST", "/hooks/front_door/motion", "").await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, _) = call(app().await, "POST", "/hooks/front_door/explode", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(app().await, "POST", "/hooks/nope/ready", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let (status, _) = call(app().await, "GET", "/metrics", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
