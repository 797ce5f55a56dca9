//! Device directory records
//!
//! Supplied by the cloud directory at startup; the protocol layer only
//! reads them.

use serde::{Deserialize, Serialize};

/// Doorbell models that take the doorbell auth variant
pub const DOORBELL_MODELS: &[&str] = &["WYZEDB3", "HL_DB2", "GW_DBD"];

/// Models whose sensor is mounted portrait (doorbell resolving variant)
pub const VERTICAL_MODELS: &[&str] = &["WYZEDB3", "GW_BE1", "AN_RDB1"];

/// Battery powered models that must be woken before connecting
pub const BATTERY_MODELS: &[&str] = &["WVOD1", "HL_WCO2", "AN_RSCW"];

/// Camera record from the device directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// User assigned nickname
    pub nickname: String,
    /// Product model string, e.g. `HL_CAM4`
    pub product_model: String,
    /// MAC address
    pub mac: String,
    /// Firmware version
    #[serde(default)]
    pub firmware_ver: Option<String>,
    /// Pairing secret used to derive the handshake keys
    #[serde(default)]
    pub enr: Option<String>,
    /// Tunnel identifier
    #[serde(default)]
    pub p2p_id: Option<String>,
    /// Last known LAN address
    #[serde(default)]
    pub ip: Option<String>,
}

impl DeviceInfo {
    /// URI-safe stream name derived from the nickname (MAC if unnamed)
    pub fn name_uri(&self) -> String {
        let name = if self.nickname.trim().is_empty() {
            &self.mac
        } else {
            &self.nickname
        };
        clean_name(name)
    }

    pub fn is_doorbell(&self) -> bool {
        DOORBELL_MODELS.contains(&self.product_model.as_str())
    }

    pub fn is_vertical(&self) -> bool {
        VERTICAL_MODELS.contains(&self.product_model.as_str())
    }

    pub fn is_battery(&self) -> bool {
        BATTERY_MODELS.contains(&self.product_model.as_str())
    }
}

/// Account identity presented to cameras during auth
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub email: String,
    /// Client identifier; padded to at least 4 bytes on the wire
    pub phone_id: String,
    /// Open user id required by newer firmware
    pub open_user_id: String,
}

/// Return a URI friendly, upper-case name with special characters removed
pub fn clean_name(name: &str) -> String {
    name.trim()
        .replace(' ', "_")
        .chars()
        .filter(|c| *c == '-' || *c == '+' || *c == '_' || c.is_alphanumeric())
        .filter(char::is_ascii)
        .collect::<String>()
        .to_uppercase()
}
