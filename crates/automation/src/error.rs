//! Automation bridge errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(#[from] rumqttc::ClientError),

    #[error("Request queue full, dropped {0}")]
    QueueFull(String),

    #[error("MQTT is disabled")]
    Disabled,

    #[error("Failed to read image: {0}")]
    Io(#[from] std::io::Error),
}
