//! Protocol Error Types

use crate::handshake::CameraState;
use thiserror::Error;

/// Errors that can occur while talking to a camera
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Buffer shorter than the fixed header
    #[error("IOCtrl message too short: {0} bytes")]
    TooShort(usize),

    /// Header does not start with `HL`
    #[error("IOCtrl message should begin with the prefix 'HL', got {0:02X?}")]
    BadMagic([u8; 2]),

    /// Declared payload length disagrees with the buffer
    #[error("Encoded length doesn't match message size (header says {expected}, got message of len {actual})")]
    LengthMismatch { expected: usize, actual: usize },

    /// Response payload did not match the command's layout
    #[error("Malformed response to {code}: {reason}")]
    MalformedResponse { code: u16, reason: String },

    /// Command parameter rejected before anything was sent
    #[error("Invalid parameter for {command}: {reason}")]
    InvalidParameter { command: &'static str, reason: String },

    /// No catalog entry for this code
    #[error("Unknown command code {0}")]
    UnknownCommand(u16),

    /// Camera reported a transient state; retry later
    #[error("Camera is {0}, can't auth")]
    CameraBusy(CameraState),

    /// Camera answered the challenge with a mode we don't understand
    #[error("Unexpected mode for connect challenge response (10001): {0}")]
    UnexpectedMode(u8),

    /// Pairing secret is missing or too short for the requested mode
    #[error("Pairing secret expected to be at least {0} bytes")]
    InvalidSecret(usize),

    /// Camera rejected the authentication reply
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// Tunnel or socket failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// No frame arrived in time
    #[error("Timeout waiting for camera response after {0}ms")]
    Timeout(u64),

    /// Session already closed
    #[error("Session is not connected")]
    NotConnected,

    /// JSON payload could not be decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Whether the exchange may be retried later without reconnecting the bridge
    pub fn is_transient(&self) -> bool {
        matches!(self, ProtocolError::CameraBusy(_) | ProtocolError::Timeout(_))
    }

    /// Whether the session stream is no longer aligned and must be re-established
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            ProtocolError::TooShort(_)
                | ProtocolError::BadMagic(_)
                | ProtocolError::LengthMismatch { .. }
                | ProtocolError::Transport(_)
        )
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        ProtocolError::Transport(err.to_string())
    }
}
