//! HL Frame Codec
//!
//! Every io-control message starts with a fixed 16 byte header:
//!
//! | offset | size | field                      |
//! |--------|------|----------------------------|
//! | 0      | 2    | magic `HL`                 |
//! | 2      | 2    | protocol version (LE)      |
//! | 4      | 2    | command code (LE)          |
//! | 6      | 4    | payload length (LE)        |
//! | 10     | 6    | reserved, always zero      |

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};

/// Size of the fixed header in bytes
pub const HEADER_LEN: usize = 16;

/// Frame magic
pub const MAGIC: [u8; 2] = *b"HL";

/// Protocol version written into every outgoing header
pub const PROTOCOL_VERSION: u16 = 5;

/// Parsed frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Protocol version spoken by the sender (varies with firmware)
    pub protocol: u16,
    /// Command code; requests are even, responses odd
    pub code: u16,
    /// Length of the payload following the header
    pub txt_len: u32,
}

impl Header {
    /// Parse the fixed header without checking the trailing payload
    pub fn parse(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Err(ProtocolError::TooShort(buf.len()));
        }
        if buf[0..2] != MAGIC {
            return Err(ProtocolError::BadMagic([buf[0], buf[1]]));
        }

        Ok(Self {
            protocol: u16::from_le_bytes([buf[2], buf[3]]),
            code: u16::from_le_bytes([buf[4], buf[5]]),
            txt_len: u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]),
        })
    }

    /// Total frame size announced by this header
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.txt_len as usize
    }
}

/// Encode a frame for `code` carrying `payload`.
///
/// The length field is always derived from the payload. Catalog payloads
/// are a few hundred bytes at most, far below the 32-bit limit.
pub fn encode(code: u16, payload: Option<&[u8]>) -> Vec<u8> {
    let payload = payload.unwrap_or_default();
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());

    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    buf.extend_from_slice(&code.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&[0u8; 6]);
    buf.extend_from_slice(payload);

    buf
}

/// Decode a complete frame, returning the header and its payload.
///
/// The payload is `None` when the header declares zero length.
pub fn decode(buf: &[u8]) -> Result<(Header, Option<&[u8]>), ProtocolError> {
    let header = Header::parse(buf)?;

    let expected = header.frame_len();
    if buf.len() != expected {
        return Err(ProtocolError::LengthMismatch {
            expected,
            actual: buf.len(),
        });
    }

    let payload = (header.txt_len > 0).then(|| &buf[HEADER_LEN..expected]);
    Ok((header, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_control_channel_bytes() {
        let buf = encode(10010, Some(&[1, 2]));
        assert_eq!(buf.len(), 18);
        assert_eq!(
            buf,
            vec![0x48, 0x4C, 0x05, 0x00, 0x0A, 0x27, 0x02, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 1, 2]
        );
        // Standard header constants
        assert_eq!(&buf[0..3], &[72, 76, 5]);
    }

    #[test]
    fn test_encode_empty_payload() {
        let buf = encode(10000, None);
        assert_eq!(buf.len(), HEADER_LEN);
        let (header, payload) = decode(&buf).unwrap();
        assert_eq!(header.code, 10000);
        assert_eq!(header.txt_len, 0);
        assert!(payload.is_none());
    }

    #[test]
    fn test_decode_too_short() {
        let err = decode(b"HL\x05\x00").unwrap_err();
        assert!(matches!(err, ProtocolError::TooShort(4)));
    }

    #[test]
    fn test_decode_bad_magic() {
        let mut buf = encode(10050, None);
        buf[0] = b'X';
        assert!(matches!(decode(&buf), Err(ProtocolError::BadMagic(_))));
    }

    #[test]
    fn test_decode_length_mismatch() {
        let mut buf = encode(10050, Some(&[1, 2, 3]));
        buf.push(0);
        assert!(matches!(
            decode(&buf),
            Err(ProtocolError::LengthMismatch { expected: 19, actual: 20 })
        ));

        let buf = encode(10050, Some(&[1, 2, 3]));
        assert!(decode(&buf[..18]).is_err());
    }

    #[test]
    fn test_decode_reads_sender_protocol() {
        let mut buf = encode(10001, Some(&[0; 17]));
        buf[2] = 0x13;
        let (header, _) = decode(&buf).unwrap();
        assert_eq!(header.protocol, 0x13);
        assert_eq!(header.code, 10001);
    }

    proptest! {
        #[test]
        fn test_roundtrip(code in any::<u16>(), payload in proptest::collection::vec(any::<u8>(), 0..512)) {
            let buf = encode(code, Some(&payload));
            let (header, decoded) = decode(&buf).unwrap();
            prop_assert_eq!(header.code, code);
            prop_assert_eq!(header.txt_len as usize, payload.len());
            prop_assert_eq!(header.protocol, PROTOCOL_VERSION);
            let expected = if payload.is_empty() { None } else { Some(payload.as_slice()) };
            prop_assert_eq!(decoded, expected);
        }

        #[test]
        fn test_short_buffers_rejected(buf in proptest::collection::vec(any::<u8>(), 0..HEADER_LEN)) {
            prop_assert!(decode(&buf).is_err());
        }
    }
}
