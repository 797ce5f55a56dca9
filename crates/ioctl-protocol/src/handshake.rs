//! Connect Handshake
//!
//! 1. client sends ConnectRequest (10000)
//! 2. camera answers with a status byte and an encrypted 16 byte nonce (10001)
//! 3. client decrypts the nonce with key material derived from the status
//!    and answers with one of three auth variants
//! 4. camera replies with a JSON session document

use crate::capability::CapabilityTable;
use crate::cipher::{self, Key};
use crate::command::Command;
use crate::device::{Account, DeviceInfo};
use crate::error::ProtocolError;
use std::fmt;
use tracing::{debug, warn};

/// Publicly known key used for status 1
pub const DEFAULT_KEY: Key = *b"FFFFFFFFFFFFFFFF";

/// Code of the challenge frame
pub const CHALLENGE_CODE: u16 = 10001;

/// Transient camera states reported in place of a challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    Updating = 2,
    CheckingEnr = 4,
    Off = 5,
}

impl CameraState {
    pub fn from_status(status: u8) -> Option<Self> {
        match status {
            2 => Some(Self::Updating),
            4 => Some(Self::CheckingEnr),
            5 => Some(Self::Off),
            _ => None,
        }
    }
}

impl fmt::Display for CameraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Updating => write!(f, "updating"),
            Self::CheckingEnr => write!(f, "checking enr"),
            Self::Off => write!(f, "off"),
        }
    }
}

/// Parsed 10001 payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Challenge {
    pub status: u8,
    pub nonce: [u8; 16],
}

impl Challenge {
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        let (&status, rest) = data.split_first().ok_or_else(|| short_challenge(0))?;
        let nonce = rest
            .get(..16)
            .and_then(|n| <[u8; 16]>::try_from(n).ok())
            .ok_or_else(|| short_challenge(data.len()))?;
        Ok(Self { status, nonce })
    }
}

fn short_challenge(len: usize) -> ProtocolError {
    ProtocolError::MalformedResponse {
        code: CHALLENGE_CODE,
        reason: format!("challenge needs 17 bytes, got {len}"),
    }
}

/// Which connect-auth message the camera expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthVariant {
    /// 10002: challenge response and MAC prefix
    Legacy,
    /// 10006: doorbell form carrying the open user id
    Doorbell,
    /// 10008: carries the open user id
    User,
}

impl AuthVariant {
    pub fn code(&self) -> u16 {
        match self {
            Self::Legacy => 10002,
            Self::Doorbell => 10006,
            Self::User => 10008,
        }
    }

    /// Pick the newest variant the device understands at `protocol`
    pub fn select(device: &DeviceInfo, protocol: u32, caps: &CapabilityTable) -> Self {
        let model = device.product_model.as_str();
        if device.is_doorbell() && caps.supports(model, protocol, 10006) {
            Self::Doorbell
        } else if model != "WYZEDB3" && caps.supports(model, protocol, 10008) {
            Self::User
        } else {
            Self::Legacy
        }
    }
}

/// Decrypt the camera's nonce into the challenge response.
///
/// `enr` is the device pairing secret; status 3 needs 16 bytes of it,
/// status 6 needs 32.
pub fn generate_challenge_response(
    nonce: &[u8; 16],
    enr: &[u8],
    status: u8,
) -> Result<[u8; 16], ProtocolError> {
    let plain = match status {
        1 => decrypt_block(nonce, &DEFAULT_KEY)?,
        3 => decrypt_block(nonce, &secret_key(enr, 0)?)?,
        6 => {
            let stage = decrypt_block(nonce, &secret_key(enr, 0)?)?;
            decrypt_block(&stage, &secret_key(enr, 16)?)?
        }
        other => {
            return Err(match CameraState::from_status(other) {
                Some(state) => ProtocolError::CameraBusy(state),
                None => ProtocolError::UnexpectedMode(other),
            })
        }
    };
    Ok(plain)
}

fn secret_key(enr: &[u8], offset: usize) -> Result<Key, ProtocolError> {
    enr.get(offset..offset + 16)
        .and_then(|k| Key::try_from(k).ok())
        .ok_or(ProtocolError::InvalidSecret(offset + 16))
}

fn decrypt_block(block: &[u8; 16], key: &Key) -> Result<[u8; 16], ProtocolError> {
    cipher::decrypt(block, key)
        .and_then(|plain| <[u8; 16]>::try_from(plain).ok())
        .ok_or_else(|| ProtocolError::MalformedResponse {
            code: CHALLENGE_CODE,
            reason: "nonce is not a cipher block".to_string(),
        })
}

/// Identifiers shorter than 4 bytes get `1234` appended; exactly 4 are sent
fn short_id(id: &str) -> [u8; 4] {
    let mut padded = id.to_string();
    if padded.len() < 4 {
        padded.push_str("1234");
    }
    let mut out = [0u8; 4];
    out.copy_from_slice(&padded.as_bytes()[..4]);
    out
}

/// Build the auth message for `variant`
pub fn auth_command(
    variant: AuthVariant,
    challenge_response: &[u8; 16],
    device: &DeviceInfo,
    account: &Account,
    video: bool,
    audio: bool,
) -> Result<Command, ProtocolError> {
    let mut payload = Vec::with_capacity(23 + account.open_user_id.len());
    payload.extend_from_slice(challenge_response);

    match variant {
        AuthVariant::Legacy => {
            payload.extend_from_slice(&short_id(&device.mac));
            payload.push(video as u8);
            payload.push(audio as u8);
        }
        AuthVariant::Doorbell | AuthVariant::User => {
            let open_user_id = account.open_user_id.as_bytes();
            let len = u8::try_from(open_user_id.len()).map_err(|_| ProtocolError::InvalidParameter {
                command: "ConnectUserAuth",
                reason: format!("open user id is {} bytes", open_user_id.len()),
            })?;
            payload.extend_from_slice(&short_id(&account.phone_id));
            payload.push(video as u8);
            payload.push(audio as u8);
            payload.push(len);
            payload.extend_from_slice(open_user_id);
        }
    }

    Ok(Command::with_payload(variant.code(), Some(payload)))
}

/// Answer a 10001 challenge.
///
/// `protocol` is the revision from the challenge frame header. Transient
/// camera states come back as [`ProtocolError::CameraBusy`].
pub fn respond_to_challenge(
    data: &[u8],
    protocol: u16,
    device: &DeviceInfo,
    account: &Account,
    caps: &CapabilityTable,
    audio: bool,
) -> Result<Command, ProtocolError> {
    let challenge = Challenge::parse(data)?;

    if let Some(state) = CameraState::from_status(challenge.status) {
        warn!("Camera {} is {}, can't auth", device.name_uri(), state);
        return Err(ProtocolError::CameraBusy(state));
    }
    if !matches!(challenge.status, 1 | 3 | 6) {
        warn!(
            "Unexpected mode for connect challenge response (10001): status={}",
            challenge.status
        );
        return Err(ProtocolError::UnexpectedMode(challenge.status));
    }

    let enr = device.enr.as_deref().unwrap_or_default().as_bytes();
    let response = generate_challenge_response(&challenge.nonce, enr, challenge.status)?;
    let variant = AuthVariant::select(device, protocol as u32, caps);

    debug!(
        "Answering challenge for {} with {:?} (status {}, protocol {})",
        device.name_uri(),
        variant,
        challenge.status,
        protocol
    );
    auth_command(variant, &response, device, account, true, audio)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENR: &[u8; 32] = b"0123456789abcdefFEDCBA9876543210";

    fn nonce() -> [u8; 16] {
        core::array::from_fn(|i| i as u8)
    }

    fn device(model: &str) -> DeviceInfo {
        DeviceInfo {
            nickname: "Porch".to_string(),
            product_model: model.to_string(),
            mac: "D03F27AABBCC".to_string(),
            firmware_ver: None,
            enr: Some(String::from_utf8(ENR.to_vec()).unwrap()),
            p2p_id: None,
            ip: None,
        }
    }

    fn account() -> Account {
        Account {
            email: "user@example.com".to_string(),
            phone_id: "ab".to_string(),
            open_user_id: "open-user".to_string(),
        }
    }

    fn caps() -> CapabilityTable {
        CapabilityTable::from_json(
            r#"{"supportedCommands": {
                "default": {"1": ["10000", "10002"], "10": ["10008"]},
                "HL_DB2": {"1": ["10006"]}
            }}"#,
        )
        .unwrap()
    }

    fn challenge(status: u8) -> Vec<u8> {
        let mut data = vec![status];
        data.extend_from_slice(&nonce());
        data
    }

    #[test]
    fn test_status_three_single_stage() {
        let response = generate_challenge_response(&nonce(), ENR, 3).unwrap();
        assert_eq!(
            response,
            [0xc2, 0x1f, 0x33, 0x5c, 0x95, 0x06, 0x2a, 0xb5, 0x3b, 0x0e, 0x80, 0x0e, 0x10, 0xb4, 0xe7, 0x34]
        );
    }

    #[test]
    fn test_status_one_fixed_key() {
        let response = generate_challenge_response(&nonce(), &[], 1).unwrap();
        assert_eq!(
            response,
            [0xfe, 0xeb, 0xd3, 0xd3, 0x14, 0x38, 0x20, 0xe4, 0x08, 0xc5, 0x25, 0x9a, 0xbc, 0xd1, 0xfb, 0xb7]
        );
    }

    #[test]
    fn test_status_six_two_stage() {
        let response = generate_challenge_response(&nonce(), ENR, 6).unwrap();
        assert_eq!(
            response,
            [0x62, 0xf0, 0x0f, 0x98, 0x59, 0x45, 0xf2, 0x81, 0xbe, 0xb5, 0xb9, 0xa9, 0xed, 0xc4, 0x5e, 0xeb]
        );
    }

    #[test]
    fn test_status_six_roundtrip() {
        let first: Key = ENR[..16].try_into().unwrap();
        let second: Key = ENR[16..].try_into().unwrap();
        let inner = cipher::encrypt(b"challenge-answer", &second).unwrap();
        let nonce: [u8; 16] = cipher::encrypt(&inner, &first).unwrap().try_into().unwrap();

        let response = generate_challenge_response(&nonce, ENR, 6).unwrap();
        assert_eq!(&response, b"challenge-answer");
    }

    #[test]
    fn test_short_secret_rejected() {
        assert!(matches!(
            generate_challenge_response(&nonce(), &ENR[..20], 6),
            Err(ProtocolError::InvalidSecret(32))
        ));
        assert!(matches!(
            generate_challenge_response(&nonce(), b"short", 3),
            Err(ProtocolError::InvalidSecret(16))
        ));
    }

    #[test]
    fn test_busy_states_are_transient() {
        for status in [2, 4, 5] {
            let err = respond_to_challenge(&challenge(status), 10, &device("HL_CAM4"), &account(), &caps(), false)
                .unwrap_err();
            assert!(matches!(err, ProtocolError::CameraBusy(_)));
            assert!(err.is_transient());
        }
    }

    #[test]
    fn test_unexpected_mode() {
        let err = respond_to_challenge(&challenge(9), 10, &device("HL_CAM4"), &account(), &caps(), false)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedMode(9)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_truncated_challenge() {
        assert!(Challenge::parse(&[3, 1, 2]).is_err());
        assert!(Challenge::parse(&[]).is_err());
        assert_eq!(Challenge::parse(&challenge(3)).unwrap().nonce, nonce());
    }

    #[test]
    fn test_variant_selection() {
        let caps = caps();
        assert_eq!(AuthVariant::select(&device("HL_DB2"), 1, &caps), AuthVariant::Doorbell);
        assert_eq!(AuthVariant::select(&device("HL_CAM4"), 10, &caps), AuthVariant::User);
        assert_eq!(AuthVariant::select(&device("HL_CAM4"), 9, &caps), AuthVariant::Legacy);
        // WYZEDB3 never takes the 10008 form
        assert_eq!(AuthVariant::select(&device("WYZEDB3"), 10, &caps), AuthVariant::Legacy);
    }

    #[test]
    fn test_legacy_payload() {
        let cmd = respond_to_challenge(&challenge(3), 1, &device("HL_CAM4"), &account(), &caps(), true).unwrap();
        assert_eq!(cmd.code(), 10002);
        let payload = cmd.payload().unwrap();
        assert_eq!(payload.len(), 22);
        assert_eq!(&payload[16..], b"D03F\x01\x01");
    }

    #[test]
    fn test_user_payload_pads_phone_id() {
        let cmd = respond_to_challenge(&challenge(1), 10, &device("HL_CAM4"), &account(), &caps(), false).unwrap();
        assert_eq!(cmd.code(), 10008);
        let payload = cmd.payload().unwrap();
        assert_eq!(&payload[16..20], b"ab12");
        assert_eq!(&payload[20..23], &[1, 0, 9]);
        assert_eq!(&payload[23..], b"open-user");
    }
}
