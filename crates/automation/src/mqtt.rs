//! MQTT automation bridge
//!
//! Outbound: camera state, command results and preview images under the
//! configured base topic. Inbound: `<topic>/<uri>/<cmd>/set|get` requests
//! dispatched to a [`CommandSink`].

use crate::retry::RetryGate;
use crate::AutomationError;
use async_trait::async_trait;
use rumqttc::{AsyncClient, ClientError, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stream_manager::{CommandSink, Publisher};
use tracing::{debug, error, info, warn};

/// Request queue between client handles and the event loop
const REQUEST_CAPACITY: usize = 64;

/// Commands whose `get` carries a payload
const GET_PAYLOAD: &[&str] = &["camera_info", "param_info"];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Base topic for everything the bridge publishes
    pub topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Empty picks a random id
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub retries: u32,
    pub retry_backoff_secs: u64,
    /// Subscribe to inbound command topics
    pub commands: bool,
    pub image_ext: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 1883,
            topic: "camera-bridge".to_string(),
            username: None,
            password: None,
            client_id: String::new(),
            keep_alive_secs: 30,
            retries: 3,
            retry_backoff_secs: 1,
            commands: true,
            image_ext: "jpg".to_string(),
        }
    }
}

/// Publishing side of the bridge
pub struct MqttBridge {
    client: AsyncClient,
    topic: String,
    gate: Arc<RetryGate>,
    image_dir: PathBuf,
    image_ext: String,
}

impl MqttBridge {
    /// Create the client and its event loop. Nothing touches the network
    /// until [`MqttEventLoop::run`] is polled.
    pub fn connect(config: &MqttConfig, image_dir: PathBuf) -> (Arc<Self>, MqttEventLoop) {
        let client_id = if config.client_id.is_empty() {
            let id = uuid::Uuid::new_v4().simple().to_string();
            format!("camera-bridge-{}", &id[..8])
        } else {
            config.client_id.clone()
        };

        let mut options = MqttOptions::new(client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        if let Some(user) = &config.username {
            options.set_credentials(user, config.password.clone().unwrap_or_default());
        }
        options.set_last_will(LastWill::new(
            format!("{}/state", config.topic),
            "offline",
            QoS::AtLeastOnce,
            true,
        ));

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let gate = Arc::new(RetryGate::new(
            config.retries,
            Duration::from_secs(config.retry_backoff_secs),
        ));
        info!("[MQTT] Connecting to {}:{}", config.host, config.port);

        let bridge = Arc::new(Self {
            client: client.clone(),
            topic: config.topic.clone(),
            gate: gate.clone(),
            image_dir,
            image_ext: config.image_ext.clone(),
        });
        let eventloop = MqttEventLoop {
            eventloop,
            client,
            topic: config.topic.clone(),
            commands: config.commands,
            gate,
        };
        (bridge, eventloop)
    }

    /// Full topic for a path under the base topic
    pub fn topic(&self, path: &str) -> String {
        format!("{}/{}", self.topic, path)
    }

    pub fn is_active(&self) -> bool {
        self.gate.is_active()
    }

    /// Publish under the base topic without waiting on the event loop.
    ///
    /// A full request queue drops the message; other client errors go
    /// through the retry gate.
    pub async fn publish_bytes(&self, path: &str, payload: Vec<u8>, retain: bool) -> Result<(), AutomationError> {
        if !self.gate.is_active() {
            return Err(AutomationError::Disabled);
        }
        let topic = self.topic(path);
        debug!("[MQTT] Publishing {} bytes to {}", payload.len(), topic);

        let try_publish = |client: &AsyncClient| {
            client.try_publish(topic.clone(), QoS::AtMostOnce, retain, payload.clone())
        };
        match try_publish(&self.client) {
            Ok(()) => Ok(()),
            Err(ClientError::TryRequest(_)) => {
                debug!("[MQTT] Request queue full, dropping {}", topic);
                Err(AutomationError::QueueFull(topic.clone()))
            }
            Err(e) => {
                warn!("[MQTT] {}", e);
                self.gate
                    .run(|| {
                        let result = try_publish(&self.client).map_err(AutomationError::from);
                        async move { result }
                    })
                    .await
            }
        }
    }

    /// Mark the bridge offline before shutdown
    pub async fn offline(&self) {
        if let Err(e) = self.publish_bytes("state", b"offline".to_vec(), true).await {
            debug!("[MQTT] Failed to publish offline state: {}", e);
        }
    }

    fn image_path(&self, uri: &str) -> PathBuf {
        self.image_dir.join(format!("{}.{}", uri, self.image_ext))
    }
}

#[async_trait]
impl Publisher for MqttBridge {
    async fn publish(&self, topic: &str, payload: String, retain: bool) {
        if let Err(e) = self.publish_bytes(topic, payload.into_bytes(), retain).await {
            debug!("[MQTT] {} not published: {}", topic, e);
        }
    }

    async fn preview(&self, uri: &str) {
        if !self.gate.is_active() {
            return;
        }
        let image = match tokio::fs::read(self.image_path(uri)).await {
            Ok(image) => image,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!("[MQTT] [{}] {}", uri, AutomationError::Io(e));
                return;
            }
        };
        if let Err(e) = self.publish_bytes(&format!("{uri}/image"), image, true).await {
            debug!("[MQTT] [{}] preview not published: {}", uri, e);
        }
    }
}

/// Inbound side of the bridge; must be polled for anything to be sent
pub struct MqttEventLoop {
    eventloop: EventLoop,
    client: AsyncClient,
    topic: String,
    commands: bool,
    gate: Arc<RetryGate>,
}

impl MqttEventLoop {
    /// Drive the connection until MQTT is disabled
    pub async fn run(mut self, sink: Arc<dyn CommandSink>) {
        info!("[MQTT] Starting");
        let mut failures = 0u32;

        while self.gate.is_active() {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    failures = 0;
                    self.on_connect();
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.on_message(&publish.topic, &publish.payload, &sink);
                }
                Ok(_) => {}
                Err(e) => {
                    failures += 1;
                    error!(
                        "[MQTT] {}. Retrying {}/{}...",
                        e,
                        failures,
                        self.gate.retries()
                    );
                    if failures >= self.gate.retries() {
                        self.gate.disable();
                        break;
                    }
                    tokio::time::sleep(self.gate.backoff()).await;
                }
            }
        }
        info!("[MQTT] Stopped");
    }

    fn on_connect(&self) {
        info!("[MQTT] Connected");
        let state = format!("{}/state", self.topic);
        if let Err(e) = self.client.try_publish(state, QoS::AtLeastOnce, true, "online") {
            warn!("[MQTT] Failed to publish online state: {}", e);
        }
        if !self.commands {
            return;
        }
        for action in ["set", "get"] {
            let filter = format!("{}/+/+/{}", self.topic, action);
            match self.client.try_subscribe(&filter, QoS::AtMostOnce) {
                Ok(()) => debug!("[MQTT] Subscribed to {}", filter),
                Err(e) => warn!("[MQTT] Failed to subscribe to {}: {}", filter, e),
            }
        }
    }

    fn on_message(&self, topic: &str, payload: &[u8], sink: &Arc<dyn CommandSink>) {
        let Some(request) = CommandTopic::parse(&self.topic, topic) else {
            warn!("[MQTT] Invalid topic: {}", topic);
            return;
        };

        let payload = if request.set || GET_PAYLOAD.contains(&request.cmd.as_str()) {
            parse_payload(payload)
        } else {
            Value::Null
        };

        let sink = sink.clone();
        tokio::spawn(async move {
            let result = sink.send_cmd(&request.cam, &request.cmd, payload).await;
            if !result.is_success() {
                let summary = serde_json::to_string(&result).unwrap_or_default();
                info!("[MQTT] {}", summary);
            }
        });
    }
}

/// An inbound `<topic>/<uri>/<cmd>/<set|get>` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTopic {
    pub cam: String,
    pub cmd: String,
    pub set: bool,
}

impl CommandTopic {
    pub fn parse(base: &str, topic: &str) -> Option<Self> {
        let rest = topic.strip_prefix(base)?.strip_prefix('/')?;
        let mut parts = rest.split('/');
        let (cam, cmd, action) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() || cam.is_empty() || cmd.is_empty() {
            return None;
        }
        let set = match action {
            "set" => true,
            "get" => false,
            _ => return None,
        };
        Some(Self {
            cam: cam.to_uppercase(),
            cmd: cmd.to_string(),
            set,
        })
    }
}

/// Decode an inbound payload. JSON objects and arrays are kept, a single-key
/// object collapses to its value, anything else is passed on as text.
pub fn parse_payload(payload: &[u8]) -> Value {
    let text = String::from_utf8_lossy(payload).trim().to_string();
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) if map.len() == 1 => {
            map.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null)
        }
        Ok(Value::Object(map)) if map.is_empty() => Value::Null,
        Ok(Value::Array(items)) if items.is_empty() => Value::Null,
        Ok(json @ (Value::Object(_) | Value::Array(_))) => json,
        _ if text.is_empty() => Value::Null,
        _ => Value::String(text),
    }
}
