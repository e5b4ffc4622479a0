//! # Keel Core Lifecycle Errors
//!
//! [`LifecycleError`] is raised while a run drives its plugins. Plugin
//! failures are wrapped with the plugin name, its role and the operation that
//! failed before they surface here.
use std::time::Duration;

use thiserror::Error;

use crate::config::model::PluginRole;
use crate::kernel::constants;
use crate::lifecycle::state::LifecycleState;
use crate::plugin_system::error::PluginError;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{role} plugin '{plugin}' timed out during '{operation}' after {}s", timeout.as_secs_f64())]
    PluginTimeout {
        plugin: String,
        role: PluginRole,
        operation: String,
        timeout: Duration,
    },

    #[error("{role} plugin '{plugin}' failed during '{operation}': {source}")]
    PluginOperation {
        plugin: String,
        role: PluginRole,
        operation: String,
        #[source]
        source: PluginError,
    },

    #[error("provider '{plugin}' failed to sync dependency '{dependency}': {reason}")]
    SyncFailed {
        plugin: String,
        dependency: String,
        reason: String,
    },

    #[error("generator '{plugin}' failed: {reason}")]
    Generation { plugin: String, reason: String },

    #[error("{} of {total} dependencies failed to sync: {}", failed.len(), failed.join(", "))]
    PartialSync { failed: Vec<String>, total: usize },

    #[error("project version is dynamic but could not be determined: {reason}")]
    UnresolvedVersion { reason: String },

    #[error("provider '{plugin}' did not satisfy: {}", requirements.join(", "))]
    UnsatisfiedResolution {
        plugin: String,
        requirements: Vec<String>,
    },

    #[error("run cancelled")]
    Cancelled,

    #[error("invalid lifecycle transition from {from} to {to}")]
    InvalidTransition { from: LifecycleState, to: LifecycleState },

    #[error("no {0} plugin is active")]
    MissingRole(PluginRole),
}

impl LifecycleError {
    pub fn exit_code(&self) -> u8 {
        match self {
            LifecycleError::PartialSync { .. } => constants::EXIT_PARTIAL_FAILURE,
            LifecycleError::UnresolvedVersion { .. } => constants::EXIT_CONFIGURATION_ERROR,
            _ => constants::EXIT_PLUGIN_ERROR,
        }
    }
}
