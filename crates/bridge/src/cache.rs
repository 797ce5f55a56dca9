//! File-backed cache of expensive lookups

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode cache entry {name}: {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One JSON file per entry under a cache directory
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Cached value for `name`; unreadable entries count as missing
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let path = self.path(name);
        let data = std::fs::read(&path).ok()?;
        match serde_json::from_slice(&data) {
            Ok(value) => {
                debug!("Loaded {} from cache", name);
                Some(value)
            }
            Err(e) => {
                warn!("Ignoring corrupt cache entry {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, name: &str, value: &T) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| CacheError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let data = serde_json::to_vec_pretty(value).map_err(|source| CacheError::Encode {
            name: name.to_string(),
            source,
        })?;
        let path = self.path(name);
        std::fs::write(&path, data).map_err(|source| CacheError::Io { path, source })
    }

    pub fn invalidate(&self, name: &str) -> Result<(), CacheError> {
        let path = self.path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }

    /// Remove every cached entry
    pub fn clear(&self) -> Result<(), CacheError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(CacheError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                std::fs::remove_file(&path).map_err(|source| CacheError::Io { path, source })?;
            }
        }
        debug!("Cleared cache in {}", self.dir.display());
        Ok(())
    }
}
