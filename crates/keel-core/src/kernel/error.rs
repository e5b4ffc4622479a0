//! # Keel Core Kernel Errors
//!
//! Defines the crate-wide [`Error`] type.
//!
//! Every subsystem owns a typed error enum ([`ConfigSystemError`],
//! [`PluginSystemError`], [`LifecycleError`], [`StorageSystemError`]); the
//! kernel [`Error`] aggregates them through `#[from]` conversions so callers of
//! the engine see one uniform error shape. [`Error::exit_code`] maps every
//! variant onto the process exit codes published by the command-line surface.
use std::path::PathBuf;
use std::result::Result as StdResult;

use thiserror::Error as ThisError;

use crate::config::error::ConfigSystemError;
use crate::kernel::constants;
use crate::lifecycle::error::LifecycleError;
use crate::plugin_system::error::PluginSystemError;
use crate::storage::error::StorageSystemError;

/// Custom error type for the Keel engine
#[derive(Debug, ThisError)]
pub enum Error {
    /// Malformed, missing or contradictory configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigSystemError),

    /// Registry-time failures (unknown plugin, failed instantiation, duplicate role)
    #[error("Plugin system error: {0}")]
    PluginSystem(#[from] PluginSystemError),

    /// Failures raised while driving the resolve/sync/generate lifecycle
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Filesystem failures in the engine's own storage (lock artifact, staging)
    #[error("Storage system error: {0}")]
    StorageSystem(#[from] StorageSystemError),

    /// Generic error with message
    #[error("Error: {0}")]
    Other(String),
}

/// Shorthand for Result with our Error type
pub type Result<T> = StdResult<T, Error>;

impl Error {
    /// Helper to create an I/O error carrying the failed operation and path.
    pub fn io(source: std::io::Error, operation: impl Into<String>, path: PathBuf) -> Self {
        Error::StorageSystem(StorageSystemError::io(source, operation, path))
    }

    /// Process exit code for this error.
    ///
    /// Configuration problems map to `1`, partial dependency failures under the
    /// collect-all policy map to `3`, everything else is reported as a plugin
    /// (runtime) failure with `2`.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Config(_) => constants::EXIT_CONFIGURATION_ERROR,
            Error::PluginSystem(_) => constants::EXIT_PLUGIN_ERROR,
            Error::Lifecycle(err) => err.exit_code(),
            Error::StorageSystem(_) | Error::Other(_) => constants::EXIT_PLUGIN_ERROR,
        }
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}
