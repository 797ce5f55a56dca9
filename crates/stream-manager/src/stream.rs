//! Stream contract and command results

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Command handled by the manager rather than the camera
pub const UPDATE_SNAPSHOT: &str = "update_snapshot";

/// Lifecycle of a camera stream; the numeric value doubles as its health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Offline = -90,
    Stopping = -1,
    Disabled = 0,
    Stopped = 1,
    Connecting = 2,
    Connected = 3,
}

impl StreamStatus {
    pub fn from_i32(value: i32) -> Self {
        match value {
            -1 => Self::Stopping,
            0 => Self::Disabled,
            1 => Self::Stopped,
            2 => Self::Connecting,
            3 => Self::Connected,
            _ => Self::Offline,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Stopping => "stopping",
            Self::Disabled => "disabled",
            Self::Stopped => "stopped",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One camera's session as seen by the manager
#[async_trait]
pub trait Stream: Send + Sync {
    /// URI-safe camera name
    fn uri(&self) -> &str;

    /// Bring the session up; true when connected
    async fn start(&self) -> bool;

    /// Tear the session down
    async fn stop(&self);

    fn enabled(&self) -> bool;

    fn connected(&self) -> bool;

    /// Current health; > 0 means alive
    async fn health_check(&self) -> i32;

    fn motion(&self) -> bool;

    fn set_motion(&self, motion: bool);

    fn status(&self) -> StreamStatus;

    /// Execute a named command
    async fn send_cmd(&self, cmd: &str, payload: &Value) -> CommandResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Error,
}

/// Outcome of a dispatched command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub status: ResultStatus,
    pub command: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    /// Set by a stream asking the manager to capture a snapshot
    #[serde(default, skip_serializing)]
    pub update_snapshot: bool,
}

impl CommandResult {
    pub fn success(command: &str, payload: Value, value: Option<Value>) -> Self {
        Self {
            status: ResultStatus::Success,
            command: command.to_string(),
            payload,
            response: value.clone(),
            value,
            update_snapshot: false,
        }
    }

    pub fn error(command: &str, payload: Value, response: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Error,
            command: command.to_string(),
            payload,
            value: None,
            response: Some(Value::String(response.into())),
            update_snapshot: false,
        }
    }

    /// Ask the manager to capture a snapshot on the caller's behalf
    pub fn snapshot_request(command: &str, payload: Value) -> Self {
        Self {
            update_snapshot: true,
            ..Self::success(command, payload, None)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    /// Value as mirrored to the automation bridge
    pub fn mirror_value(&self) -> String {
        match &self.value {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Bool(b)) => (if *b { "1" } else { "0" }).to_string(),
            Some(other) => other.to_string(),
        }
    }
}
