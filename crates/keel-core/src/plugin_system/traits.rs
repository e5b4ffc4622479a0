//! The plugin role contracts.
//!
//! Every plugin implements [`Plugin`] plus exactly one role trait. The engine
//! only ever talks to plugins through these traits.
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::config::data::ConfigData;
use crate::config::model::{PluginRole, ProjectIdentity};
use crate::plugin_system::dependency::{
    GenerationReport, Identification, Requirement, ResolvedDependency, ResolvedDependencySet, StagingSlot, SyncData,
};
use crate::plugin_system::error::{PluginError, PluginResult};
use crate::plugin_system::version::{ApiVersion, VersionRange};

/// Everything a plugin factory receives. The payload is moved into the plugin.
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub name: String,
    pub role: PluginRole,
    pub project_root: PathBuf,
    pub project: ProjectIdentity,
    /// `<install-path>/<plugin-name>`
    pub install_directory: PathBuf,
    /// `<tool-path>/keel/<role-dir>/<plugin-name>`
    pub tool_directory: PathBuf,
    pub cache_directory: PathBuf,
    pub build_directory: PathBuf,
    pub configuration: ConfigData,
}

/// Base behaviour shared by all plugins.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Engine API versions this plugin works with
    fn compatible_api_versions(&self) -> Vec<VersionRange> {
        vec![VersionRange::caret(&ApiVersion::CURRENT)]
    }

    /// Release held resources. Called once, at the end of every run.
    fn shutdown(&self) -> PluginResult<()> {
        Ok(())
    }
}

/// Reads version metadata from a source-control system. Never writes.
#[async_trait]
pub trait SourceControlProvider: Plugin {
    async fn identify(&self, working_directory: &Path) -> PluginResult<Identification>;

    async fn is_repository(&self, path: &Path) -> bool;
}

/// Resolves and installs dependencies.
#[async_trait]
pub trait DependencyProvider: Plugin {
    /// Pin every requirement to a concrete version. May consult a cache but
    /// must not touch the install root.
    async fn resolve(&self, requirements: &[Requirement]) -> PluginResult<ResolvedDependencySet>;

    /// Install one dependency into `slot`. The engine commits the slot over
    /// its destination only if this returns `Ok`.
    async fn sync(&self, dependency: &ResolvedDependency, slot: StagingSlot<'_>) -> PluginResult<()>;

    /// Re-resolve against the latest upstream state.
    async fn update(&self, requirements: &[Requirement], install_root: &Path) -> PluginResult<ResolvedDependencySet>;

    /// Fetch external tooling (package manager binaries, scripts) into
    /// `tool_directory`. Runs before anything is resolved.
    async fn prepare_tooling(&self, _tool_directory: &Path) -> PluginResult<()> {
        Ok(())
    }

    /// Describe the installed set in `format`, one of the sync formats this
    /// provider was registered with.
    async fn sync_data(
        &self,
        format: &str,
        _dependencies: &ResolvedDependencySet,
        _install_root: &Path,
    ) -> PluginResult<SyncData> {
        Err(PluginError::NotSupported(format!("sync data in format '{}'", format)))
    }
}

/// Emits build-system integration files for the installed dependencies.
#[async_trait]
pub trait BuildGenerator: Plugin {
    async fn prepare_tooling(&self, _tool_directory: &Path) -> PluginResult<()> {
        Ok(())
    }

    /// Write the integration files into `output`. Must be deterministic for
    /// equal inputs. `sync_data` is present when the generator was registered
    /// with sync formats.
    async fn generate(
        &self,
        dependencies: &ResolvedDependencySet,
        install_root: &Path,
        sync_data: Option<&SyncData>,
        output: StagingSlot<'_>,
    ) -> PluginResult<GenerationReport>;
}
