//! Device directory
//!
//! Camera records and the account come from a JSON file maintained by the
//! cloud client. The last good copy is cached so the bridge can start
//! while the directory is being refreshed.

use crate::cache::{CacheError, FileCache};
use crate::config::DeviceConfig;
use ioctl_protocol::{Account, DeviceInfo};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

const CACHE_KEY: &str = "directory";

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Failed to read device directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid device directory: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Device directory belongs to {found}, expected {expected}")]
    AccountMismatch { expected: String, found: String },

    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryData {
    pub account: Account,
    #[serde(default)]
    pub cameras: Vec<DeviceInfo>,
}

pub struct DeviceDirectory {
    path: PathBuf,
    cache: FileCache,
    fresh_data: bool,
    email: Option<String>,
    filter: Vec<String>,
}

impl DeviceDirectory {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            path: config.directory.clone(),
            cache: FileCache::new(&config.cache_dir),
            fresh_data: config.fresh_data,
            email: config.email.clone(),
            filter: config.filter.clone(),
        }
    }

    fn email_matches(&self, account: &Account) -> bool {
        self.email
            .as_deref()
            .map_or(true, |email| email.eq_ignore_ascii_case(&account.email))
    }

    /// Cached directory if usable, otherwise the directory file
    pub fn load(&self) -> Result<DirectoryData, DirectoryError> {
        if self.fresh_data {
            info!("Fresh data requested, clearing cache");
            self.cache.clear()?;
        } else if let Some(cached) = self.cache.get::<DirectoryData>(CACHE_KEY) {
            if self.email_matches(&cached.account) {
                info!("Using cached device directory ({} camera(s))", cached.cameras.len());
                return Ok(self.filtered(cached));
            }
            warn!("Cached account {} does not match, refreshing", cached.account.email);
            self.cache.invalidate(CACHE_KEY)?;
        }

        let data = self.read_file()?;
        if let Some(expected) = self.email.as_deref().filter(|_| !self.email_matches(&data.account)) {
            return Err(DirectoryError::AccountMismatch {
                expected: expected.to_string(),
                found: data.account.email,
            });
        }
        if let Err(e) = self.cache.set(CACHE_KEY, &data) {
            warn!("Failed to cache device directory: {}", e);
        }
        info!("Loaded {} camera(s) from {}", data.cameras.len(), self.path.display());
        Ok(self.filtered(data))
    }

    fn read_file(&self) -> Result<DirectoryData, DirectoryError> {
        let raw = std::fs::read(&self.path).map_err(|source| DirectoryError::Io {
            path: self.path.clone(),
            source,
        })?;
        let mut data: DirectoryData = serde_json::from_slice(&raw)?;
        if data.account.phone_id.trim().is_empty() {
            data.account.phone_id = uuid::Uuid::new_v4().to_string();
        }
        Ok(data)
    }

    fn filtered(&self, mut data: DirectoryData) -> DirectoryData {
        if !self.filter.is_empty() {
            data.cameras.retain(|cam| {
                let uri = cam.name_uri();
                self.filter.iter().any(|f| f.eq_ignore_ascii_case(&uri))
            });
        }
        data
    }
}
