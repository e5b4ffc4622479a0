use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::kernel::constants;
use crate::plugin_system::dependency::ResolvedDependency;
use crate::storage::error::StorageSystemError;
use crate::storage::local::write_atomic;

/// Written into every committed dependency directory; records what was
/// installed there and by which provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallStamp {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub provider: String,
}

impl InstallStamp {
    pub fn new(provider: &str, dependency: &ResolvedDependency) -> Self {
        Self {
            name: dependency.name.clone(),
            version: dependency.version.clone(),
            source: dependency.source.clone(),
            checksum: dependency.checksum.clone(),
            provider: provider.to_string(),
        }
    }

    /// Whether this stamp describes exactly `dependency` installed by `provider`.
    pub fn matches(&self, provider: &str, dependency: &ResolvedDependency) -> bool {
        *self == Self::new(provider, dependency)
    }

    /// Read the stamp in `dir`. A missing or unreadable stamp yields `None`,
    /// which callers treat as "not installed".
    pub fn read(dir: &Path) -> Option<Self> {
        let path = dir.join(constants::STAMP_FILE);
        let contents = std::fs::read(&path).ok()?;
        match serde_json::from_slice(&contents) {
            Ok(stamp) => Some(stamp),
            Err(err) => {
                debug!("Ignoring unreadable install stamp {}: {}", path.display(), err);
                None
            }
        }
    }

    pub fn write(&self, dir: &Path) -> Result<(), StorageSystemError> {
        let path = dir.join(constants::STAMP_FILE);
        let contents = serde_json::to_vec_pretty(self).map_err(|source| StorageSystemError::SerializationError {
            format: "json".to_string(),
            path: path.clone(),
            source,
        })?;
        write_atomic(&path, &contents)
    }
}
