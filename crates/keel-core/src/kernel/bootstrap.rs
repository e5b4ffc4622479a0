use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::config::model::ResolvedConfiguration;
use crate::config::resolver::ConfigResolver;
use crate::config::source::{self, ProjectSources};
use crate::kernel::constants;
use crate::kernel::error::Result;
use crate::lifecycle::orchestrator::Orchestrator;
use crate::lifecycle::result::{LifecycleResult, RunMode};
use crate::lifecycle::status::{self, StatusReport};
use crate::plugin_system::catalog::PluginCatalog;
use crate::plugin_system::registry::{DiscoveredPlugins, PluginRegistry};
use crate::storage::lockfile::LockFile;
use crate::storage::locks::PathLocks;

/// The entry point binding a plugin catalog to the standard project layout.
///
/// One engine can serve any number of runs, sequentially or concurrently;
/// they share its path locks, so two runs never write the same install
/// directory at once.
pub struct Engine {
    registry: PluginRegistry,
    locks: PathLocks,
    home_dir: Option<PathBuf>,
    global_config: Option<PathBuf>,
}

impl Engine {
    /// Creates an engine with the user's home directory and global override
    /// taken from the environment.
    pub fn new(catalog: PluginCatalog) -> Self {
        log::info!(
            "Initializing {} v{} with {} plugin registrations",
            constants::APP_NAME,
            constants::APP_VERSION,
            catalog.len()
        );
        Self {
            registry: PluginRegistry::new(catalog),
            locks: PathLocks::new(),
            home_dir: source::home_dir(),
            global_config: source::global_config_path(),
        }
    }

    /// Home directory used for the default install path.
    pub fn with_home_dir(mut self, home_dir: Option<PathBuf>) -> Self {
        self.home_dir = home_dir;
        self
    }

    /// Location of the global override; `None` disables that layer.
    pub fn with_global_config(mut self, path: Option<PathBuf>) -> Self {
        self.global_config = path;
        self
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Every registered plugin, grouped by role.
    pub fn plugins(&self) -> DiscoveredPlugins {
        self.registry.discover()
    }

    /// The three configuration layers of the project at `root`.
    pub fn sources(&self, root: &Path) -> ProjectSources {
        ProjectSources::with_global_path(root, self.global_config.clone())
    }

    /// Resolve the project's configuration without running anything.
    pub fn resolve(&self, root: &Path) -> Result<ResolvedConfiguration> {
        let config = ConfigResolver::new(root)
            .with_home_dir(self.home_dir.clone())
            .resolve_sources(&self.sources(root))?;
        Ok(config)
    }

    pub async fn resolve_and_sync(&self, root: &Path) -> LifecycleResult {
        self.run(root, RunMode::Install, CancellationToken::new())
            .await
    }

    pub async fn update(&self, root: &Path) -> LifecycleResult {
        self.run(root, RunMode::Update, CancellationToken::new())
            .await
    }

    /// Run the lifecycle; cancelling `cancel` stops it at the next plugin
    /// call boundary and aborts in-flight syncs.
    pub async fn run(&self, root: &Path, mode: RunMode, cancel: CancellationToken) -> LifecycleResult {
        Orchestrator::new(&self.registry, &self.locks)
            .with_cancellation(cancel)
            .with_home_dir(self.home_dir.clone())
            .run(&self.sources(root), mode)
            .await
    }

    /// Compare requirements, the lock file and installed dependencies.
    pub fn status(&self, root: &Path) -> Result<StatusReport> {
        let config = self.resolve(root)?;
        let lock = LockFile::load(config.options().lock_path())?;
        Ok(status::inspect(&config, &lock)?)
    }
}

/// The nearest directory at or above `start` holding a project manifest.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(constants::MANIFEST_FILE).is_file())
        .map(Path::to_path_buf)
}
