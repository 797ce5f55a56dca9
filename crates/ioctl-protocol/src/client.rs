//! Camera Client
//!
//! Drives the handshake and request/response exchanges over one session.

use crate::capability::CapabilityTable;
use crate::command::Command;
use crate::device::{Account, DeviceInfo};
use crate::error::ProtocolError;
use crate::frame::{self, Header, PROTOCOL_VERSION};
use crate::handshake::{self, CHALLENGE_CODE};
use crate::transport::{Connector, Transport};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for a single camera reply
const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Unrelated frames tolerated while waiting for a reply
const MAX_SKIPPED_FRAMES: usize = 10;

/// Client for one camera's io-control channel
pub struct CameraClient {
    device: DeviceInfo,
    account: Account,
    caps: Arc<CapabilityTable>,
    transport: Option<Box<dyn Transport>>,
    /// Revision reported by the camera in its challenge frame
    protocol: u16,
    timeout: Duration,
}

impl CameraClient {
    pub fn new(device: DeviceInfo, account: Account, caps: Arc<CapabilityTable>) -> Self {
        Self {
            device,
            account,
            caps,
            transport: None,
            protocol: PROTOCOL_VERSION,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    /// Set the per-reply timeout
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    /// Open a session through `connector`
    pub async fn connect(&mut self, connector: &dyn Connector) -> Result<(), ProtocolError> {
        let transport = connector.connect(&self.device).await?;
        self.attach(transport);
        Ok(())
    }

    /// Use an already open session
    pub fn attach(&mut self, transport: Box<dyn Transport>) {
        self.transport = Some(transport);
    }

    /// Run the connect handshake and return the camera's session document.
    ///
    /// `wake` adds the wake payload for sleeping battery cameras.
    pub async fn authenticate(&mut self, wake: bool, audio: bool) -> Result<Value, ProtocolError> {
        let mac = self.device.mac.clone();
        let request = Command::connect_request(wake.then_some(mac.as_str()));
        self.transmit(&request).await?;

        let (header, challenge) = self.receive_code(CHALLENGE_CODE).await?;
        self.protocol = header.protocol;

        let auth = handshake::respond_to_challenge(
            challenge.as_deref().unwrap_or_default(),
            header.protocol,
            &self.device,
            &self.account,
            &self.caps,
            audio,
        )?;
        let reply = self.send(&auth).await?;

        let accepted = match reply.get("connectionRes") {
            Some(Value::String(res)) => res == "1",
            Some(Value::Number(res)) => res.as_u64() == Some(1),
            _ => false,
        };
        if !accepted {
            warn!("Camera {} rejected auth: {}", self.device.name_uri(), reply);
            return Err(ProtocolError::AuthRejected(reply.to_string()));
        }

        info!(
            "Authenticated with {} ({}, protocol {})",
            self.device.name_uri(),
            auth.name(),
            self.protocol
        );
        Ok(reply)
    }

    /// Send `cmd` and return its parsed reply
    pub async fn send(&mut self, cmd: &Command) -> Result<Value, ProtocolError> {
        self.transmit(cmd).await?;
        let (_, payload) = self.receive_code(cmd.expected_response_code()).await?;
        cmd.parse_response(payload.as_deref())
    }

    /// Whether the connected camera understands `code`
    pub fn supports(&self, code: u16) -> bool {
        self.caps
            .supports(&self.device.product_model, self.protocol as u32, code)
    }

    /// Protocol revision negotiated during the handshake
    pub fn protocol(&self) -> u16 {
        self.protocol
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Close the session
    pub async fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            info!("Disconnecting from {}", self.device.name_uri());
            if let Err(e) = transport.close().await {
                debug!("Error closing session for {}: {}", self.device.name_uri(), e);
            }
        }
    }

    async fn transmit(&mut self, cmd: &Command) -> Result<(), ProtocolError> {
        let transport = self.transport.as_mut().ok_or(ProtocolError::NotConnected)?;
        debug!("Sending {} ({}) to {}", cmd.name(), cmd.code(), self.device.name_uri());
        let result = transport.send(&cmd.encode()).await;
        self.check(result)
    }

    async fn receive_code(&mut self, code: u16) -> Result<(Header, Option<Vec<u8>>), ProtocolError> {
        for _ in 0..=MAX_SKIPPED_FRAMES {
            let transport = self.transport.as_mut().ok_or(ProtocolError::NotConnected)?;
            let received = transport.receive(self.timeout).await;
            let buf = self.check(received)?;
            let decoded = frame::decode(&buf).map(|(h, p)| (h, p.map(<[u8]>::to_vec)));
            let (header, payload) = self.check(decoded)?;

            if header.code == code {
                return Ok((header, payload));
            }
            debug!("Skipping frame {} while waiting for {}", header.code, code);
        }

        Err(ProtocolError::MalformedResponse {
            code,
            reason: format!("no reply after {MAX_SKIPPED_FRAMES} unrelated frames"),
        })
    }

    /// Drop the session when the stream can no longer be trusted
    fn check<T>(&mut self, result: Result<T, ProtocolError>) -> Result<T, ProtocolError> {
        if let Err(e) = &result {
            if e.is_desync() {
                warn!("Session with {} desynchronized: {}", self.device.name_uri(), e);
                self.transport = None;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned frames and records what was sent
    struct MockTransport {
        replies: VecDeque<Vec<u8>>,
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, frame: &[u8]) -> Result<(), ProtocolError> {
            self.sent.lock().unwrap().push(frame.to_vec());
            Ok(())
        }

        async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, ProtocolError> {
            self.replies
                .pop_front()
                .ok_or(ProtocolError::Timeout(timeout.as_millis() as u64))
        }

        async fn close(&mut self) -> Result<(), ProtocolError> {
            Ok(())
        }
    }

    fn client(replies: Vec<Vec<u8>>) -> (CameraClient, Arc<Mutex<Vec<Vec<u8>>>>) {
        let device = DeviceInfo {
            nickname: "Porch".to_string(),
            product_model: "HL_CAM4".to_string(),
            mac: "D03F27AABBCC".to_string(),
            firmware_ver: Some("4.36.11".to_string()),
            enr: Some("0123456789abcdefFEDCBA9876543210".to_string()),
            p2p_id: None,
            ip: None,
        };
        let account = Account {
            email: "user@example.com".to_string(),
            phone_id: "phone-1".to_string(),
            open_user_id: "open".to_string(),
        };
        let caps = CapabilityTable::from_json(
            r#"{"supportedCommands": {"default": {"1": ["10000"], "20": ["10008"]}}}"#,
        )
        .unwrap();

        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut client = CameraClient::new(device, account, Arc::new(caps));
        client.attach(Box::new(MockTransport {
            replies: replies.into(),
            sent: sent.clone(),
        }));
        (client, sent)
    }

    fn challenge(protocol: u16, status: u8) -> Vec<u8> {
        let mut payload = vec![status];
        payload.extend(0u8..16);
        let mut buf = frame::encode(10001, Some(&payload));
        buf[2..4].copy_from_slice(&protocol.to_le_bytes());
        buf
    }

    fn sent_codes(sent: &Arc<Mutex<Vec<Vec<u8>>>>) -> Vec<u16> {
        sent.lock()
            .unwrap()
            .iter()
            .map(|f| Header::parse(f).unwrap().code)
            .collect()
    }

    #[tokio::test]
    async fn test_authenticate_with_user_variant() {
        let (mut client, sent) = client(vec![
            challenge(25, 3),
            frame::encode(10011, Some(&[0])),
            frame::encode(10009, Some(br#"{"connectionRes":"1","cameraInfo":{}}"#)),
        ]);

        let reply = client.authenticate(true, false).await.unwrap();
        assert_eq!(reply["connectionRes"], "1");
        assert_eq!(client.protocol(), 25);
        assert!(client.supports(10008));
        assert_eq!(sent_codes(&sent), vec![10000, 10008]);

        // Wake payload carries the MAC
        let first = sent.lock().unwrap()[0].clone();
        assert!(String::from_utf8_lossy(&first[16..]).contains("D03F27AABBCC"));
    }

    #[tokio::test]
    async fn test_authenticate_legacy_on_old_firmware() {
        let (mut client, sent) = client(vec![
            challenge(5, 1),
            frame::encode(10003, Some(br#"{"connectionRes":"1"}"#)),
        ]);
        client.authenticate(false, false).await.unwrap();
        assert_eq!(sent_codes(&sent), vec![10000, 10002]);
        assert_eq!(sent.lock().unwrap()[0].len(), 16);
    }

    #[tokio::test]
    async fn test_authenticate_rejected() {
        let (mut client, _) = client(vec![
            challenge(25, 3),
            frame::encode(10009, Some(br#"{"connectionRes":"2"}"#)),
        ]);
        assert!(matches!(
            client.authenticate(false, false).await,
            Err(ProtocolError::AuthRejected(_))
        ));
    }

    #[tokio::test]
    async fn test_authenticate_busy_camera() {
        let (mut client, _) = client(vec![challenge(25, 2)]);
        let err = client.authenticate(false, false).await.unwrap_err();
        assert!(err.is_transient());
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_send_parses_reply() {
        let (mut client, _) = client(vec![frame::encode(10051, Some(&[0x78, 0, 2, 30, 1, 2]))]);
        let cmd = Command::build(10050, &Value::Null).unwrap();
        let value = client.send(&cmd).await.unwrap();
        assert_eq!(value["bitrate"], json!(120));
    }

    #[tokio::test]
    async fn test_desync_drops_session() {
        let mut bad = frame::encode(10051, None);
        bad[0] = b'X';
        let (mut client, _) = client(vec![bad]);
        let cmd = Command::build(10050, &Value::Null).unwrap();
        assert!(matches!(client.send(&cmd).await, Err(ProtocolError::BadMagic(_))));
        assert!(!client.is_connected());
        assert!(matches!(client.send(&cmd).await, Err(ProtocolError::NotConnected)));
    }

    #[tokio::test]
    async fn test_gives_up_after_unrelated_frames() {
        let noise = (0..=MAX_SKIPPED_FRAMES).map(|_| frame::encode(10011, None)).collect();
        let (mut client, _) = client(noise);
        let cmd = Command::build(10050, &Value::Null).unwrap();
        assert!(matches!(
            client.send(&cmd).await,
            Err(ProtocolError::MalformedResponse { code: 10051, .. })
        ));
    }
}
