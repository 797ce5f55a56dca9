//! Bridge configuration
//!
//! Built-in defaults, then an optional TOML file, then `BRIDGE_*`
//! environment variables (`BRIDGE_MQTT__HOST=broker`).

use automation::MqttConfig;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use stream_manager::{ManagerConfig, SnapshotCommand, StreamOptions};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub logging: LoggingConfig,
    pub api: ApiConfig,
    pub mqtt: MqttConfig,
    pub monitor: MonitorConfig,
    pub snapshot: SnapshotConfig,
    pub devices: DeviceConfig,
    /// Defaults for every stream
    pub streams: StreamOptions,
    /// Per-camera overrides keyed by stream URI
    pub cameras: HashMap<String, StreamOptions>,
    pub tunnel: TunnelConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty`, `compact` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub listen: String,
    /// Seconds to replenish one request
    pub rate_per_second: u64,
    pub rate_burst: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: "0.0.0.0:5000".to_string(),
            rate_per_second: 1,
            rate_burst: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub tick_ms: u64,
    pub health_interval_secs: u64,
    /// 0 disables periodic snapshots
    pub snapshot_interval_secs: u64,
    pub snapshot_timeout_secs: u64,
    /// 0 disables preview publishing
    pub preview_interval_ms: u64,
    pub motion_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            health_interval_secs: 15,
            snapshot_interval_secs: 0,
            snapshot_timeout_secs: 15,
            preview_interval_ms: 1000,
            motion_timeout_secs: 20,
        }
    }
}

impl MonitorConfig {
    pub fn manager_config(&self) -> ManagerConfig {
        let nonzero = |v: u64, unit: fn(u64) -> Duration| (v > 0).then(|| unit(v));
        ManagerConfig {
            tick: Duration::from_millis(self.tick_ms),
            health_interval: Duration::from_secs(self.health_interval_secs),
            snapshot_interval: nonzero(self.snapshot_interval_secs, Duration::from_secs),
            snapshot_timeout: Duration::from_secs(self.snapshot_timeout_secs),
            preview_interval: nonzero(self.preview_interval_ms, Duration::from_millis),
            motion_timeout: Duration::from_secs(self.motion_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub program: String,
    /// `{uri}`, `{img_dir}` and `{rtsp_url}` are substituted
    pub args: Vec<String>,
    pub img_dir: PathBuf,
    pub rtsp_url: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        let args = [
            "-loglevel", "error",
            "-y",
            "-rtsp_transport", "tcp",
            "-i", "{rtsp_url}/{uri}",
            "-frames:v", "1",
            "-f", "image2",
            "{img_dir}/{uri}.jpg",
        ];
        Self {
            program: "ffmpeg".to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            img_dir: PathBuf::from("img"),
            rtsp_url: "rtsp://127.0.0.1:8554".to_string(),
        }
    }
}

impl SnapshotConfig {
    /// Capture command with everything but `{uri}` filled in
    pub fn command(&self) -> SnapshotCommand {
        let img_dir = self.img_dir.to_string_lossy();
        let args = self
            .args
            .iter()
            .map(|arg| {
                arg.replace("{img_dir}", &img_dir)
                    .replace("{rtsp_url}", self.rtsp_url.trim_end_matches('/'))
            })
            .collect();
        SnapshotCommand::new(self.program.clone(), args)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device directory written by the cloud client
    pub directory: PathBuf,
    pub cache_dir: PathBuf,
    /// Ignore cached data
    pub fresh_data: bool,
    /// Cached data for another account is discarded
    pub email: Option<String>,
    /// Capability table; the bundled one is used when unset
    pub capabilities: Option<PathBuf>,
    /// Only these URIs are bridged when non-empty
    pub filter: Vec<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("devices.json"),
            cache_dir: PathBuf::from("tokens"),
            fresh_data: false,
            email: None,
            capabilities: None,
            filter: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// `host:port` of the local tunnel for each camera MAC
    pub endpoints: HashMap<String, String>,
    pub connect_timeout_secs: u64,
    pub reply_timeout_secs: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            endpoints: HashMap::new(),
            connect_timeout_secs: 10,
            reply_timeout_secs: 5,
        }
    }
}

impl BridgeConfig {
    /// Load defaults, the optional file at `path`, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            debug!("Loading configuration from: {}", path.display());
            builder = builder.add_source(File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("BRIDGE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: BridgeConfig = settings.try_deserialize()?;
        config.validate()?;
        info!("Configuration loaded successfully");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.tick_ms == 0 {
            return Err(ConfigError::Message("monitor.tick_ms must be greater than 0".to_string()));
        }
        if self.monitor.health_interval_secs == 0 {
            return Err(ConfigError::Message(
                "monitor.health_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.monitor.snapshot_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "monitor.snapshot_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.snapshot.program.trim().is_empty() {
            return Err(ConfigError::Message("snapshot.program must not be empty".to_string()));
        }
        if self.mqtt.enabled && self.mqtt.topic.trim_matches('/').is_empty() {
            return Err(ConfigError::Message("mqtt.topic must not be empty".to_string()));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "compact" | "json") {
            return Err(ConfigError::Message(format!(
                "Unknown logging.format '{}'",
                self.logging.format
            )));
        }
        Ok(())
    }

    /// Stream options for `uri`, falling back to the shared defaults
    pub fn stream_options(&self, uri: &str) -> StreamOptions {
        self.cameras
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(uri))
            .map(|(_, options)| options.clone())
            .unwrap_or_else(|| self.streams.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.streams.quality, "hd180");

        let manager = config.monitor.manager_config();
        assert_eq!(manager.snapshot_interval, None);
        assert_eq!(manager.preview_interval, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("bridge-config-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[monitor]
snapshot_interval_secs = 180

[mqtt]
enabled = true
topic = "cams"

[cameras.FRONT_DOOR]
quality = "sd30"
"#
        )
        .unwrap();

        let config = BridgeConfig::load(Some(path.as_path())).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.monitor.snapshot_interval_secs, 180);
        assert!(config.mqtt.enabled);
        assert_eq!(config.mqtt.topic, "cams");
        assert_eq!(config.stream_options("front_door").quality, "sd30");
        assert_eq!(config.stream_options("BACK").quality, "hd180");
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = BridgeConfig::default();
        config.monitor.tick_ms = 0;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_snapshot_command_placeholders() {
        let config = SnapshotConfig {
            img_dir: PathBuf::from("/var/img"),
            ..SnapshotConfig::default()
        };
        let command = config.command();
        assert_eq!(command.program, "ffmpeg");
        assert!(command.args.contains(&"/var/img/{uri}.jpg".to_string()));
        assert!(command.args.contains(&"rtsp://127.0.0.1:8554/{uri}".to_string()));
    }
}
