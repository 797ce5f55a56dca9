//! Capability Table
//!
//! Maps a device model (or the `default` wildcard) and a firmware protocol
//! revision to the command codes introduced at that revision. A code is
//! supported at revision P when it appears under any revision <= P in the
//! default table or in the model's own table.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Wildcard model applying to every device
pub const DEFAULT_MODEL: &str = "default";

/// Starter table shipped with the crate
const BUNDLED: &str = include_str!("../data/capabilities.json");

/// Errors while loading a capability table
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Failed to read capability table: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid capability table JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid protocol revision '{revision}' for model {model}")]
    InvalidRevision { model: String, revision: String },

    #[error("Invalid command code '{code}' for model {model}")]
    InvalidCode { model: String, code: String },
}

#[derive(Debug, Deserialize)]
struct CapabilityFile {
    #[serde(rename = "supportedCommands")]
    supported_commands: HashMap<String, HashMap<String, Vec<String>>>,
}

/// Immutable model/revision → command code table
#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    models: HashMap<String, BTreeMap<u32, BTreeSet<u16>>>,
}

impl CapabilityTable {
    /// Parse a `{"supportedCommands": {model: {revision: [codes]}}}` document
    pub fn from_json(json: &str) -> Result<Self, CapabilityError> {
        let file: CapabilityFile = serde_json::from_str(json)?;
        let mut models = HashMap::with_capacity(file.supported_commands.len());

        for (model, revisions) in file.supported_commands {
            let mut table = BTreeMap::new();
            for (revision, codes) in revisions {
                let rev: u32 = revision.trim().parse().map_err(|_| {
                    CapabilityError::InvalidRevision {
                        model: model.clone(),
                        revision: revision.clone(),
                    }
                })?;
                let entry: &mut BTreeSet<u16> = table.entry(rev).or_default();
                for code in codes {
                    let parsed = code.trim().parse().map_err(|_| CapabilityError::InvalidCode {
                        model: model.clone(),
                        code: code.clone(),
                    })?;
                    entry.insert(parsed);
                }
            }
            models.insert(model, table);
        }

        debug!("Loaded capability table for {} models", models.len());
        Ok(Self { models })
    }

    /// Load a table from disk
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CapabilityError> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let table = Self::from_json(&json)?;
        info!(
            "Capability table loaded from {} ({} models)",
            path.as_ref().display(),
            table.models.len()
        );
        Ok(table)
    }

    /// The starter table compiled into the crate
    pub fn bundled() -> Result<Self, CapabilityError> {
        Self::from_json(BUNDLED)
    }

    /// All codes supported by `model` at `protocol`
    pub fn supported(&self, model: &str, protocol: u32) -> BTreeSet<u16> {
        [DEFAULT_MODEL, model]
            .iter()
            .filter_map(|m| self.models.get(*m))
            .flat_map(|revisions| revisions.range(..=protocol))
            .flat_map(|(_, codes)| codes.iter().copied())
            .collect()
    }

    /// Whether `model` understands `code` at firmware protocol revision `protocol`
    pub fn supports(&self, model: &str, protocol: u32, code: u16) -> bool {
        [DEFAULT_MODEL, model]
            .iter()
            .filter_map(|m| self.models.get(*m))
            .any(|revisions| {
                revisions
                    .range(..=protocol)
                    .any(|(_, codes)| codes.contains(&code))
            })
    }

    /// Number of models with entries (including the default)
    pub fn model_count(&self) -> usize {
        self.models.len()
    }
}
