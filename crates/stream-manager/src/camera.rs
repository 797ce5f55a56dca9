//! Camera stream over the io-control client

use crate::stream::{CommandResult, Stream, StreamStatus, UPDATE_SNAPSHOT};
use async_trait::async_trait;
use ioctl_protocol::{topic, CameraClient, Command, Connector, ProtocolError, Topic};
use metrics::counter;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Bitrate used when the quality string does not carry one
const DEFAULT_BITRATE: u16 = 180;

/// Frame size selector for SD quality
const SD_FRAME_SIZE: u8 = 1;

fn default_quality() -> String {
    "hd180".to_string()
}

fn default_true() -> bool {
    true
}

/// Per-camera stream settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StreamOptions {
    /// `hd` or `sd` followed by an optional bitrate, e.g. `hd180`, `sd30`
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(default)]
    pub audio: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Frame size for HD quality
    #[serde(default)]
    pub hq_frame_size: u8,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            quality: default_quality(),
            audio: false,
            enabled: true,
            hq_frame_size: 0,
        }
    }
}

/// Frame size and bitrate pushed after connecting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality {
    pub frame_size: u8,
    pub bitrate: u16,
}

impl Quality {
    pub fn parse(quality: &str, hq_frame_size: u8) -> Self {
        let mut quality = quality.trim().to_ascii_lowercase();
        if quality.is_empty() {
            quality.push_str("hd");
        }
        while quality.len() < 3 {
            quality.push('0');
        }

        let bitrate = quality
            .get(2..)
            .and_then(|b| b.parse::<u16>().ok())
            .filter(|b| *b > 0)
            .unwrap_or(DEFAULT_BITRATE);
        let frame_size = if quality.contains("sd") {
            SD_FRAME_SIZE
        } else {
            hq_frame_size
        };

        Self {
            frame_size,
            bitrate,
        }
    }
}

/// A [`Stream`] backed by one camera session
pub struct CameraStream {
    uri: String,
    client: Mutex<CameraClient>,
    connector: Arc<dyn Connector>,
    options: StreamOptions,
    state: AtomicI32,
    enabled: AtomicBool,
    motion: AtomicBool,
}

impl CameraStream {
    pub fn new(client: CameraClient, connector: Arc<dyn Connector>, options: StreamOptions) -> Self {
        let uri = client.device().name_uri();
        let state = if options.enabled {
            StreamStatus::Stopped
        } else {
            StreamStatus::Disabled
        };
        Self {
            uri,
            client: Mutex::new(client),
            connector,
            enabled: AtomicBool::new(options.enabled),
            options,
            state: AtomicI32::new(state as i32),
            motion: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    fn set_state(&self, state: StreamStatus) {
        self.state.store(state as i32, Ordering::SeqCst);
    }

    async fn open(&self, client: &mut CameraClient) -> Result<(), ProtocolError> {
        client.connect(self.connector.as_ref()).await?;

        let wake = client.device().is_battery();
        client.authenticate(wake, self.options.audio).await?;

        let quality = Quality::parse(&self.options.quality, self.options.hq_frame_size);
        let device = client.device();
        let resolution = if device.is_doorbell() || device.is_vertical() {
            Command::doorbell_resolving_bit(quality.frame_size, quality.bitrate, 0)?
        } else {
            Command::resolving_bit(quality.frame_size, quality.bitrate, 0)?
        };
        if let Err(e) = client.send(&resolution).await {
            warn!("[{}] Failed to set resolution: {}", self.uri, e);
        }
        Ok(())
    }

    async fn state_cmd(&self, cmd: &str, payload: &Value) -> CommandResult {
        let action = payload.as_str().map(|s| s.trim().to_ascii_lowercase());
        match action.as_deref() {
            None | Some("") | Some("get") => {}
            Some("start") => {
                if !self.start().await {
                    return CommandResult::error(cmd, payload.clone(), "Failed to start stream");
                }
            }
            Some("stop") => self.stop().await,
            Some("enable") => {
                self.enabled.store(true, Ordering::SeqCst);
                if self.status() == StreamStatus::Disabled {
                    self.set_state(StreamStatus::Stopped);
                }
                info!("[{}] Enabled", self.uri);
            }
            Some("disable") => {
                self.enabled.store(false, Ordering::SeqCst);
                self.stop().await;
                info!("[{}] Disabled", self.uri);
            }
            Some(other) => {
                return CommandResult::error(cmd, payload.clone(), format!("Invalid state '{other}'"));
            }
        }
        let state = json!(self.status().as_str());
        CommandResult::success(cmd, payload.clone(), Some(state))
    }

    async fn topic_cmd(&self, topic: &Topic, payload: &Value) -> CommandResult {
        let set = !is_empty(payload) && topic.set.is_some();
        let request = match topic.request(set, payload) {
            Ok(request) => request,
            Err(e) => return CommandResult::error(topic.name, payload.clone(), e.to_string()),
        };

        if !self.connected() && !self.start().await {
            return CommandResult::error(topic.name, payload.clone(), "Camera is not connected");
        }

        let mut client = self.client.lock().await;
        if !client.supports(request.code()) {
            debug!("[{}] {} may not be supported by this firmware", self.uri, request.name());
        }

        match client.send(&request).await {
            Ok(value) => {
                let value = if set {
                    payload.clone()
                } else {
                    topic.extract(value)
                };
                CommandResult::success(topic.name, payload.clone(), Some(value))
            }
            Err(e) => {
                if !client.is_connected() {
                    self.set_state(StreamStatus::Stopped);
                }
                warn!("[{}] {} failed: {}", self.uri, topic.name, e);
                CommandResult::error(topic.name, payload.clone(), e.to_string())
            }
        }
    }
}

#[async_trait]
impl Stream for CameraStream {
    fn uri(&self) -> &str {
        &self.uri
    }

    async fn start(&self) -> bool {
        if !self.enabled() {
            return false;
        }
        let mut client = self.client.lock().await;
        if client.is_connected() {
            self.set_state(StreamStatus::Connected);
            return true;
        }

        self.set_state(StreamStatus::Connecting);
        match self.open(&mut client).await {
            Ok(()) => {
                counter!("bridge_handshakes_total", "outcome" => "success").increment(1);
                self.set_state(StreamStatus::Connected);
                info!("🎉 [{}] Connected (protocol {})", self.uri, client.protocol());
                true
            }
            Err(e) => {
                counter!("bridge_handshakes_total", "outcome" => "failed").increment(1);
                client.disconnect().await;
                let state = match e {
                    ProtocolError::AuthRejected(_)
                    | ProtocolError::UnexpectedMode(_)
                    | ProtocolError::InvalidSecret(_) => StreamStatus::Offline,
                    _ => StreamStatus::Stopped,
                };
                warn!("[{}] {}", self.uri, e);
                self.set_state(state);
                false
            }
        }
    }

    async fn stop(&self) {
        self.set_state(StreamStatus::Stopping);
        self.client.lock().await.disconnect().await;
        self.set_state(if self.enabled() {
            StreamStatus::Stopped
        } else {
            StreamStatus::Disabled
        });
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn connected(&self) -> bool {
        self.status() == StreamStatus::Connected
    }

    async fn health_check(&self) -> i32 {
        if !self.enabled() {
            return StreamStatus::Disabled as i32;
        }
        // A busy client is mid-exchange and still trusted
        if self.connected() {
            if let Ok(client) = self.client.try_lock() {
                if !client.is_connected() {
                    info!("[{}] Session dropped", self.uri);
                    self.set_state(StreamStatus::Stopped);
                }
            }
        }
        self.state.load(Ordering::SeqCst)
    }

    fn motion(&self) -> bool {
        self.motion.load(Ordering::SeqCst)
    }

    fn set_motion(&self, motion: bool) {
        self.motion.store(motion, Ordering::SeqCst);
    }

    fn status(&self) -> StreamStatus {
        StreamStatus::from_i32(self.state.load(Ordering::SeqCst))
    }

    async fn send_cmd(&self, cmd: &str, payload: &Value) -> CommandResult {
        match cmd {
            "state" => self.state_cmd(cmd, payload).await,
            UPDATE_SNAPSHOT => CommandResult::snapshot_request(cmd, payload.clone()),
            "motion" => CommandResult::success(cmd, payload.clone(), Some(json!(self.motion()))),
            _ => match topic(cmd) {
                Some(topic) => self.topic_cmd(topic, payload).await,
                None => CommandResult::error(cmd, payload.clone(), "Invalid command"),
            },
        }
    }
}

fn is_empty(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
