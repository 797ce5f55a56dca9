//! Retry-then-disable gate for the automation bridge

use crate::AutomationError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::error;

/// Retries a failing operation a fixed number of times, then switches the
/// integration off for the rest of the process lifetime.
#[derive(Debug)]
pub struct RetryGate {
    retries: u32,
    backoff: Duration,
    active: AtomicBool,
}

impl RetryGate {
    pub fn new(retries: u32, backoff: Duration) -> Self {
        Self {
            retries: retries.max(1),
            backoff,
            active: AtomicBool::new(true),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Turn the integration off permanently
    pub fn disable(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            error!("[MQTT] {}/{} retries failed. Disabling MQTT.", self.retries, self.retries);
        }
    }

    /// Run `op` until it succeeds or the retries are used up
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, AutomationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AutomationError>>,
    {
        for attempt in 1..=self.retries {
            if !self.is_active() {
                break;
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    error!("[MQTT] {}. Retrying {}/{}...", e, attempt, self.retries);
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
        self.disable();
        Err(AutomationError::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_succeeds_after_retry() {
        let gate = RetryGate::new(3, Duration::ZERO);
        let calls = AtomicU32::new(0);

        let result = gate
            .run(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(AutomationError::Connection("refused".to_string()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(gate.is_active());
    }

    #[tokio::test]
    async fn test_disables_after_retries() {
        let gate = RetryGate::new(2, Duration::ZERO);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = gate
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AutomationError::Connection("refused".to_string()))
            })
            .await;
        assert!(matches!(result, Err(AutomationError::Disabled)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!gate.is_active());

        // Stays off
        let result = gate.run(|| async { Ok(1) }).await;
        assert!(matches!(result, Err(AutomationError::Disabled)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
