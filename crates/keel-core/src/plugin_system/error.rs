//! # Keel Core Plugin System Errors
//!
//! Two layers of errors live here.
//!
//! [`PluginError`] is what a plugin returns from any of its role operations.
//! Its variants classify the failure so the engine can decide whether to retry
//! ([`PluginError::is_transient`]).
//!
//! [`PluginSystemError`] is raised by the registry while discovering and
//! selecting plugins: an unknown name, a factory that failed, or a singular role
//! that was enabled twice.
use crate::config::model::PluginRole;
use crate::plugin_system::version::VersionError;

/// Result of a plugin operation.
pub type PluginResult<T> = std::result::Result<T, PluginError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PluginError {
    /// The plugin's payload failed its own validation
    #[error("invalid plugin configuration: {0}")]
    InvalidConfiguration(String),

    /// A failure that may succeed when retried (network hiccup, busy mirror)
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("execution failed: {0}")]
    Execution(String),

    /// Downloaded or produced content did not match what was expected
    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl PluginError {
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        PluginError::InvalidConfiguration(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        PluginError::Transient(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        PluginError::Execution(message.into())
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, PluginError::Transient(_))
    }
}

impl From<std::io::Error> for PluginError {
    fn from(err: std::io::Error) -> Self {
        PluginError::Execution(err.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PluginSystemError {
    #[error("no {role} plugin named '{name}' is registered")]
    NotFound { role: PluginRole, name: String },

    #[error("failed to load {role} plugin '{name}': {reason}")]
    Load {
        role: PluginRole,
        name: String,
        reason: String,
        #[source]
        source: Option<PluginError>,
    },

    #[error("only one {role} plugin may be enabled, found: {}", names.join(", "))]
    DuplicateRole { role: PluginRole, names: Vec<String> },

    #[error(
        "generator '{generator}' consumes sync data as {}, which provider '{provider}' cannot produce",
        wanted.join(" or ")
    )]
    IncompatiblePlugins {
        provider: String,
        generator: String,
        wanted: Vec<String>,
    },

    #[error("{role} plugin '{name}' is already registered")]
    DuplicateRegistration { role: PluginRole, name: String },

    #[error("Version parsing error: {0}")]
    VersionParsing(#[from] VersionError),
}

impl PluginSystemError {
    pub fn load(role: PluginRole, name: impl Into<String>, source: PluginError) -> Self {
        PluginSystemError::Load {
            role,
            name: name.into(),
            reason: source.to_string(),
            source: Some(source),
        }
    }
}
