pub mod orchestrator_tests;
pub mod sync_tests;

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::config::model::{PluginRole, ResolvedConfiguration};
use crate::config::resolver::ConfigResolver;
use crate::config::source::ProjectSources;
use crate::kernel::constants;
use crate::lifecycle::orchestrator::Orchestrator;
use crate::lifecycle::result::{LifecycleResult, RunMode};
use crate::mock::{MockProbe, register_mock_plugins};
use crate::plugin_system::catalog::PluginCatalog;
use crate::plugin_system::registry::PluginRegistry;
use crate::storage::locks::PathLocks;

/// A project on disk wired to the fake plugins.
pub struct TestProject {
    pub dir: TempDir,
    pub probe: MockProbe,
    pub registry: PluginRegistry,
    pub locks: PathLocks,
}

impl TestProject {
    pub fn new(manifest: &str) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let probe = MockProbe::new();
        let mut catalog = PluginCatalog::new();
        register_mock_plugins(&mut catalog, &probe).unwrap();
        let project = Self {
            dir,
            probe,
            registry: PluginRegistry::new(catalog),
            locks: PathLocks::new(),
        };
        fs::create_dir_all(project.root()).unwrap();
        project.write_manifest(manifest);
        project
    }

    pub fn write_manifest(&self, manifest: &str) {
        fs::write(self.root().join(constants::MANIFEST_FILE), manifest).unwrap();
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("project")
    }

    pub fn home(&self) -> PathBuf {
        self.dir.path().join("home")
    }

    pub fn install_root(&self) -> PathBuf {
        self.home().join(".keel").join("fake")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root()
            .join("tool/keel")
            .join(PluginRole::Generator.directory_name())
            .join("fake-gen")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root().join(constants::LOCK_FILE)
    }

    pub fn sources(&self) -> ProjectSources {
        ProjectSources::with_global_path(self.root(), None)
    }

    pub fn orchestrator(&self) -> Orchestrator<'_> {
        Orchestrator::new(&self.registry, &self.locks).with_home_dir(Some(self.home()))
    }

    pub async fn run(&self, mode: RunMode) -> LifecycleResult {
        self.orchestrator().run(&self.sources(), mode).await
    }

    pub fn config(&self) -> ResolvedConfiguration {
        ConfigResolver::new(self.root())
            .with_home_dir(Some(self.home()))
            .resolve_sources(&self.sources())
            .unwrap()
    }
}

/// Staging directories left behind in `dir`
pub fn staging_leftovers(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .map(|entry| entry.unwrap().path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(constants::STAGING_PREFIX))
        })
        .collect()
}
