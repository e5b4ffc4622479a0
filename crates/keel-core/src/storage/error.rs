//! # Keel Core Storage Errors
//!
//! [`StorageSystemError`] covers the engine's own filesystem work: atomic
//! writes, staging and committing directories, install stamps and the lock
//! artifact. Plugins report their own I/O failures through
//! [`PluginError`](crate::plugin_system::error::PluginError) instead.
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageSystemError {
    #[error("I/O error during operation '{operation}' on path '{path}': {source}")]
    Io {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization to '{format}' failed for '{path}': {source}")]
    SerializationError {
        format: String,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Deserialization of '{path}' from '{format}' failed: {source}")]
    DeserializationError {
        format: String,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid path provided: '{path}': {reason}")]
    InvalidPath { path: PathBuf, reason: String },
}

// Helper for creating Io errors, ensuring path is always included.
impl StorageSystemError {
    pub fn io(source: std::io::Error, operation: impl Into<String>, path: PathBuf) -> Self {
        StorageSystemError::Io {
            source,
            operation: operation.into(),
            path,
        }
    }
}
