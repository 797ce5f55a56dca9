//! Media server health probe

use async_trait::async_trait;
use std::time::Duration;
use stream_manager::HealthCheck;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Checks that the media server's RTSP port accepts connections
#[derive(Debug, Clone)]
pub struct RtspProbe {
    addr: String,
    timeout: Duration,
}

impl RtspProbe {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    /// Probe the `host:port` of an `rtsp://` base URL
    pub fn from_url(url: &str, timeout: Duration) -> Self {
        let rest = url.strip_prefix("rtsp://").unwrap_or(url);
        let authority = rest.split('/').next().unwrap_or(rest);
        let host = authority.rsplit('@').next().unwrap_or(authority);
        let addr = if host.contains(':') {
            host.to_string()
        } else {
            format!("{host}:554")
        };
        Self::new(addr, timeout)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn probe(&self) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await,
            Ok(Ok(_))
        )
    }
}

#[async_trait]
impl HealthCheck for RtspProbe {
    async fn check(&self) {
        if self.probe().await {
            debug!("[RTSP] {} is up", self.addr);
        } else {
            warn!("[RTSP] Media server at {} is not responding", self.addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_url() {
        let timeout = Duration::from_secs(1);
        assert_eq!(RtspProbe::from_url("rtsp://127.0.0.1:8554", timeout).addr(), "127.0.0.1:8554");
        assert_eq!(RtspProbe::from_url("rtsp://user:pw@media/live", timeout).addr(), "media:554");
    }

    #[tokio::test]
    async fn test_probe() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let probe = RtspProbe::new(addr.clone(), Duration::from_secs(1));
        assert!(probe.probe().await);

        drop(listener);
        assert!(!probe.probe().await);
    }
}
