//! Session transport
//!
//! The tunnel that carries io-control frames to a camera is external; the
//! client only needs framed send/receive over it. [`TcpConnector`] reaches
//! each camera through a local tunnel endpoint that relays raw frames.

use crate::device::DeviceInfo;
use crate::error::ProtocolError;
use crate::frame::{Header, HEADER_LEN};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Largest payload accepted from a tunnel
pub const MAX_PAYLOAD_LEN: u32 = 64 * 1024;

const READ_CHUNK: usize = 4096;

/// One open session with a camera
#[async_trait]
pub trait Transport: Send {
    /// Send one complete frame
    async fn send(&mut self, frame: &[u8]) -> Result<(), ProtocolError>;

    /// Receive one complete frame, waiting at most `timeout`
    async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, ProtocolError>;

    /// Close the session; further calls fail with `NotConnected`
    async fn close(&mut self) -> Result<(), ProtocolError>;
}

/// Opens sessions to cameras
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, device: &DeviceInfo) -> Result<Box<dyn Transport>, ProtocolError>;
}

/// Connects to per-camera tunnel endpoints over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    /// MAC (upper case) → `host:port`
    endpoints: HashMap<String, String>,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(endpoints: HashMap<String, String>, connect_timeout: Duration) -> Self {
        let endpoints = endpoints
            .into_iter()
            .map(|(mac, addr)| (mac.to_uppercase(), addr))
            .collect();
        Self {
            endpoints,
            connect_timeout,
        }
    }

    /// Endpoint configured for a camera
    pub fn endpoint(&self, device: &DeviceInfo) -> Option<&str> {
        self.endpoints
            .get(&device.mac.to_uppercase())
            .map(String::as_str)
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, device: &DeviceInfo) -> Result<Box<dyn Transport>, ProtocolError> {
        let addr = self.endpoint(device).ok_or_else(|| {
            ProtocolError::Transport(format!("no tunnel endpoint for {}", device.mac))
        })?;

        debug!("Connecting to {} via {}", device.name_uri(), addr);
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ProtocolError::Timeout(self.connect_timeout.as_millis() as u64))??;
        stream.set_nodelay(true)?;

        info!("Tunnel open for {} ({})", device.name_uri(), addr);
        Ok(Box::new(TcpTransport::new(stream)))
    }
}

/// Frame-oriented session over a TCP stream.
///
/// Bytes of a partly received frame are kept across calls, so a receive
/// that times out mid-frame resumes where it stopped.
pub struct TcpTransport {
    stream: Option<TcpStream>,
    pending: Vec<u8>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Some(stream),
            pending: Vec::new(),
        }
    }

    /// Length of the first complete frame in `pending`, if any
    fn complete_frame(&self) -> Result<Option<usize>, ProtocolError> {
        if self.pending.len() < HEADER_LEN {
            return Ok(None);
        }
        let header = Header::parse(&self.pending[..HEADER_LEN])?;
        if header.txt_len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::Transport(format!(
                "frame {} announces {} bytes",
                header.code, header.txt_len
            )));
        }
        let len = header.frame_len();
        Ok((self.pending.len() >= len).then_some(len))
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(len) = self.complete_frame()? {
                let rest = self.pending.split_off(len);
                return Ok(std::mem::replace(&mut self.pending, rest));
            }

            let stream = self.stream.as_mut().ok_or(ProtocolError::NotConnected)?;
            // `read` is cancel safe; bytes are only consumed once it returns
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(ProtocolError::Transport("tunnel closed by peer".to_string()));
            }
            self.pending.extend_from_slice(&chunk[..n]);
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, frame: &[u8]) -> Result<(), ProtocolError> {
        let stream = self.stream.as_mut().ok_or(ProtocolError::NotConnected)?;
        stream.write_all(frame).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, ProtocolError> {
        if self.stream.is_none() {
            return Err(ProtocolError::NotConnected);
        }
        tokio::time::timeout(timeout, self.read_frame())
            .await
            .map_err(|_| ProtocolError::Timeout(timeout.as_millis() as u64))?
    }

    async fn close(&mut self) -> Result<(), ProtocolError> {
        self.pending.clear();
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame;
    use tokio::net::TcpListener;

    fn device() -> DeviceInfo {
        DeviceInfo {
            nickname: "Porch".to_string(),
            product_model: "HL_CAM4".to_string(),
            mac: "d03f27aabbcc".to_string(),
            firmware_ver: None,
            enr: None,
            p2p_id: None,
            ip: None,
        }
    }

    #[tokio::test]
    async fn test_frames_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; HEADER_LEN];
            socket.read_exact(&mut request).await.unwrap();
            let header = Header::parse(&request).unwrap();
            // Reply split across writes to exercise framing
            let reply = frame::encode(header.code + 1, Some(&[1, 2, 3]));
            socket.write_all(&reply[..10]).await.unwrap();
            socket.write_all(&reply[10..]).await.unwrap();
        });

        let connector = TcpConnector::new(
            HashMap::from([("D03F27AABBCC".to_string(), addr)]),
            Duration::from_secs(1),
        );
        let mut transport = connector.connect(&device()).await.unwrap();
        transport.send(&frame::encode(10050, None)).await.unwrap();

        let reply = transport.receive(Duration::from_secs(1)).await.unwrap();
        let (header, payload) = frame::decode(&reply).unwrap();
        assert_eq!(header.code, 10051);
        assert_eq!(payload, Some(&[1, 2, 3][..]));

        transport.close().await.unwrap();
        assert!(matches!(
            transport.send(&[]).await,
            Err(ProtocolError::NotConnected)
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut transport = TcpTransport::new(TcpStream::connect(addr).await.unwrap());
        let err = transport.receive(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout(50)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_receive_resumes_after_timeout_mid_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let late = frame::encode(10051, Some(&[1, 2, 3]));
            let next = frame::encode(10021, Some(&[4]));
            socket.write_all(&late[..HEADER_LEN]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
            socket.write_all(&late[HEADER_LEN..]).await.unwrap();
            socket.write_all(&next).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let mut transport = TcpTransport::new(TcpStream::connect(addr).await.unwrap());
        assert!(matches!(
            transport.receive(Duration::from_millis(100)).await,
            Err(ProtocolError::Timeout(100))
        ));

        let reply = transport.receive(Duration::from_secs(1)).await.unwrap();
        let (header, payload) = frame::decode(&reply).unwrap();
        assert_eq!(header.code, 10051);
        assert_eq!(payload, Some(&[1, 2, 3][..]));

        let reply = transport.receive(Duration::from_secs(1)).await.unwrap();
        let (header, payload) = frame::decode(&reply).unwrap();
        assert_eq!(header.code, 10021);
        assert_eq!(payload, Some(&[4][..]));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_endpoint() {
        let connector = TcpConnector::new(HashMap::new(), Duration::from_secs(1));
        assert!(matches!(
            connector.connect(&device()).await,
            Err(ProtocolError::Transport(_))
        ));
    }
}
