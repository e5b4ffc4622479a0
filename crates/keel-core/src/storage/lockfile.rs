//! The lock artifact recording the last successful sync of each project.
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::plugin_system::dependency::ResolvedDependencySet;
use crate::storage::error::StorageSystemError;
use crate::storage::local::write_atomic;

const LOCK_FORMAT_VERSION: u32 = 1;

/// One project's pinned dependencies as installed by one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub project: String,
    pub project_version: String,
    pub provider: String,
    pub dependencies: ResolvedDependencySet,
}

impl LockEntry {
    pub fn key(&self) -> String {
        LockFile::key(&self.project, &self.provider)
    }
}

/// Contents of `keel.lock`, keyed by `<project>/<provider>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockFile {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<String, LockEntry>,
}

impl Default for LockFile {
    fn default() -> Self {
        Self {
            version: LOCK_FORMAT_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

impl LockFile {
    pub fn key(project: &str, provider: &str) -> String {
        format!("{}/{}", project, provider)
    }

    /// Load a lock file; a missing file is an empty lock.
    pub fn load(path: &Path) -> Result<Self, StorageSystemError> {
        let contents = match std::fs::read(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("No lock file at {}", path.display());
                return Ok(Self::default());
            }
            Err(err) => return Err(StorageSystemError::io(err, "read", path.to_path_buf())),
        };
        serde_json::from_slice(&contents).map_err(|source| StorageSystemError::DeserializationError {
            format: "json".to_string(),
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn entry(&self, project: &str, provider: &str) -> Option<&LockEntry> {
        self.entries.get(&Self::key(project, provider))
    }

    /// Entries of one project, across providers
    pub fn entries_for<'a>(&'a self, project: &'a str) -> impl Iterator<Item = &'a LockEntry> + 'a {
        self.entries
            .values()
            .filter(move |entry| entry.project == project)
    }

    /// Store `entry`, returning whether the lock content changed.
    pub fn record(&mut self, entry: LockEntry) -> bool {
        let key = entry.key();
        if self.entries.get(&key) == Some(&entry) {
            return false;
        }
        self.entries.insert(key, entry);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<(), StorageSystemError> {
        let mut contents = serde_json::to_vec_pretty(self).map_err(|source| StorageSystemError::SerializationError {
            format: "json".to_string(),
            path: path.to_path_buf(),
            source,
        })?;
        contents.push(b'\n');
        write_atomic(path, &contents)
    }
}
