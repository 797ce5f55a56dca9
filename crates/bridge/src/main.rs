//! Camera Bridge - Main Entry Point

use anyhow::{Context, Result};
use automation::MqttBridge;
use bridge::config::BridgeConfig;
use bridge::directory::DeviceDirectory;
use bridge::health::RtspProbe;
use bridge::logging::init_logging;
use bridge::rate_limit::{create_governor_config, RateLimitConfig};
use bridge::{create_router, AppState};
use ioctl_protocol::{CameraClient, CapabilityTable, Connector, TcpConnector};
use metrics::describe_counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stream_manager::{CameraStream, CommandSink, NullPublisher, Publisher, StreamManager};
use tracing::{error, info, warn};

/// Time the MQTT event loop gets to flush the offline message
const MQTT_FLUSH: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("BRIDGE_CONFIG").ok())
        .map(PathBuf::from);
    let config = BridgeConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    init_logging(&config.logging).context("Failed to install log subscriber")?;

    info!("=== Camera Bridge v{} ===", env!("CARGO_PKG_VERSION"));

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install metrics recorder")?;
    describe_counter!("bridge_commands_total", "Camera commands dispatched, by status");
    describe_counter!("bridge_snapshots_total", "Snapshot captures, by outcome");
    describe_counter!("bridge_handshakes_total", "Camera handshakes, by outcome");

    let caps = match &config.devices.capabilities {
        Some(path) => CapabilityTable::load(path)?,
        None => CapabilityTable::bundled()?,
    };
    info!("Capability table covers {} model(s)", caps.model_count());
    let caps = Arc::new(caps);

    let directory = DeviceDirectory::new(&config.devices)
        .load()
        .context("Failed to load device directory")?;
    if directory.cameras.is_empty() {
        warn!("No cameras in the device directory");
    }

    std::fs::create_dir_all(&config.snapshot.img_dir)
        .with_context(|| format!("Failed to create {}", config.snapshot.img_dir.display()))?;

    let (mqtt, eventloop) = if config.mqtt.enabled {
        let (bridge, eventloop) = MqttBridge::connect(&config.mqtt, config.snapshot.img_dir.clone());
        (Some(bridge), Some(eventloop))
    } else {
        (None, None)
    };
    let publisher: Arc<dyn Publisher> = match &mqtt {
        Some(bridge) => bridge.clone() as Arc<dyn Publisher>,
        None => Arc::new(NullPublisher),
    };

    let manager = Arc::new(StreamManager::new(
        config.monitor.manager_config(),
        config.snapshot.command(),
        publisher.clone(),
    ));

    // Polled before registration so per-camera state publishes drain
    if let Some(eventloop) = eventloop {
        let sink: Arc<dyn CommandSink> = manager.clone();
        tokio::spawn(eventloop.run(sink));
    }

    let connector: Arc<dyn Connector> = Arc::new(TcpConnector::new(
        config.tunnel.endpoints.clone(),
        Duration::from_secs(config.tunnel.connect_timeout_secs),
    ));
    for device in directory.cameras {
        let uri = device.name_uri();
        let options = config.stream_options(&uri);
        let mut client = CameraClient::new(device, directory.account.clone(), caps.clone());
        client.set_timeout(Duration::from_secs(config.tunnel.reply_timeout_secs));

        let stream = CameraStream::new(client, connector.clone(), options);
        manager.add(Arc::new(stream)).await;
        publisher.publish(&format!("{uri}/state"), "stopped".to_string(), true).await;
    }
    info!("🎬 {} stream(s) registered", manager.total().await);

    let probe = RtspProbe::from_url(&config.snapshot.rtsp_url, Duration::from_secs(2));
    manager.spawn_monitor(Arc::new(probe)).await;

    if config.api.enabled {
        let mut state = AppState::new(manager.clone());
        state.mqtt = mqtt.clone();
        state.metrics = Some(metrics);

        let limiter = create_governor_config(&RateLimitConfig::from(&config.api));
        let app = create_router(Arc::new(state), limiter);

        let listener = tokio::net::TcpListener::bind(&config.api.listen)
            .await
            .with_context(|| format!("Failed to bind {}", config.api.listen))?;
        info!("Starting API server on {}", config.api.listen);
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("API server failed")?;
    } else {
        shutdown_signal().await;
    }

    manager.stop_all().await;
    if let Some(mqtt) = mqtt {
        mqtt.offline().await;
        tokio::time::sleep(MQTT_FLUSH).await;
    }
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}
