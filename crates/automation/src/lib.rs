//! Automation bridge
//!
//! MQTT publishing of camera state and command results, and inbound
//! command topics routed to the stream manager. Publishing goes through a
//! retry gate that switches MQTT off after repeated failures.

mod error;
mod mqtt;
mod retry;

pub use error::AutomationError;
pub use mqtt::{parse_payload, CommandTopic, MqttBridge, MqttConfig, MqttEventLoop};
pub use retry::RetryGate;
