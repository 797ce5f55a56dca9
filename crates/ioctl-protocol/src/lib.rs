//! HL io-control protocol
//!
//! This crate speaks the control channel of tunnelled cameras: the `HL`
//! frame codec, the command catalog, per-model capability lookups and the
//! XXTEA challenge handshake. Sessions run over an abstract [`Transport`].

pub mod capability;
pub mod catalog;
pub mod cipher;
mod client;
mod command;
pub mod device;
mod error;
pub mod frame;
pub mod handshake;
pub mod transport;

pub use capability::{CapabilityError, CapabilityTable};
pub use catalog::{topic, Topic};
pub use client::CameraClient;
pub use command::{Command, CruisePoint, VideoSetting, OFF, ON};
pub use device::{Account, DeviceInfo};
pub use error::ProtocolError;
pub use frame::Header;
pub use handshake::{AuthVariant, CameraState};
pub use transport::{Connector, TcpConnector, Transport};

/// Media channel selectors for ControlChannel (10010)
pub mod media {
    pub const VIDEO: u8 = 1;
    pub const AUDIO: u8 = 2;
    pub const RETURN_AUDIO: u8 = 3;
    pub const RDT: u8 = 4;
}
