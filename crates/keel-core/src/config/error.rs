//! # Keel Core Configuration Errors
//!
//! [`ConfigSystemError`] covers everything that can go wrong between reading
//! the configuration layers and producing a validated resolved configuration.
//! Field-level variants carry a dotted field path (`keel.sync-workers`,
//! `project.version`) so the user can locate the offending entry.
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigSystemError {
    #[error("invalid configuration at '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("conflicting configuration at '{field}': {reason}")]
    MergeConflict { field: String, reason: String },

    #[error("configuration source '{source_name}' is unavailable: {reason}")]
    SourceUnavailable {
        source_name: String,
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("failed to parse configuration source '{source_name}' as {format}: {message}")]
    Parse {
        source_name: String,
        format: String,
        message: String,
    },

    #[error("unsupported configuration format for path: {0}")]
    UnsupportedFormat(PathBuf),
}

impl ConfigSystemError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigSystemError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn conflict(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigSystemError::MergeConflict {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// The dotted field path for field-level errors.
    pub fn field(&self) -> Option<&str> {
        match self {
            ConfigSystemError::Invalid { field, .. } | ConfigSystemError::MergeConflict { field, .. } => {
                Some(field)
            }
            _ => None,
        }
    }
}
