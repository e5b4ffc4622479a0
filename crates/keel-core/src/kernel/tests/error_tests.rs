use std::time::Duration;

use crate::config::error::ConfigSystemError;
use crate::config::model::PluginRole;
use crate::kernel::constants;
use crate::kernel::error::Error;
use crate::lifecycle::error::LifecycleError;
use crate::plugin_system::error::{PluginError, PluginSystemError};

#[test]
fn test_exit_codes_by_error_kind() {
    let config: Error = ConfigSystemError::invalid("keel.sync-workers", "must be between 1 and 64").into();
    assert_eq!(config.exit_code(), constants::EXIT_CONFIGURATION_ERROR);

    let not_found: Error = PluginSystemError::NotFound {
        role: PluginRole::Provider,
        name: "conan".to_string(),
    }
    .into();
    assert_eq!(not_found.exit_code(), constants::EXIT_PLUGIN_ERROR);

    let timeout: Error = LifecycleError::PluginTimeout {
        plugin: "fake".to_string(),
        role: PluginRole::Provider,
        operation: "resolve".to_string(),
        timeout: Duration::from_secs(5),
    }
    .into();
    assert_eq!(timeout.exit_code(), constants::EXIT_PLUGIN_ERROR);

    let partial: Error = LifecycleError::PartialSync {
        failed: vec!["libb".to_string()],
        total: 3,
    }
    .into();
    assert_eq!(partial.exit_code(), constants::EXIT_PARTIAL_FAILURE);

    let unresolved: Error = LifecycleError::UnresolvedVersion {
        reason: "no tags".to_string(),
    }
    .into();
    assert_eq!(unresolved.exit_code(), constants::EXIT_CONFIGURATION_ERROR);
}

#[test]
fn test_plugin_errors_carry_context() {
    let err = LifecycleError::PluginOperation {
        plugin: "fake".to_string(),
        role: PluginRole::Provider,
        operation: "resolve".to_string(),
        source: PluginError::execution("registry unreachable"),
    };

    let message = err.to_string();
    assert!(message.contains("provider plugin 'fake'"), "{message}");
    assert!(message.contains("'resolve'"), "{message}");
    assert!(message.contains("registry unreachable"), "{message}");
}

#[test]
fn test_config_errors_name_the_field() {
    let err = ConfigSystemError::invalid("keel.dependencies[0]", "empty version constraint after '@'");
    assert_eq!(err.field(), Some("keel.dependencies[0]"));
    assert!(Error::from(err).to_string().contains("keel.dependencies[0]"));
}
