//! Outbound and inbound seams to the automation bridge and the media server

use crate::stream::CommandResult;
use async_trait::async_trait;
use serde_json::Value;

/// Receives state the bridge mirrors outward. Topics are relative to the
/// bridge's base topic.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: String, retain: bool);

    /// A fresh still image for `uri` is on disk
    async fn preview(&self, uri: &str);
}

/// Publisher used when no automation bridge is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPublisher;

#[async_trait]
impl Publisher for NullPublisher {
    async fn publish(&self, _topic: &str, _payload: String, _retain: bool) {}

    async fn preview(&self, _uri: &str) {}
}

/// Anything that accepts camera commands
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send_cmd(&self, cam: &str, cmd: &str, payload: Value) -> CommandResult;

    /// Names of every registered stream
    async fn stream_uris(&self) -> Vec<String>;
}

/// External media server probe run on the health interval
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self);
}
