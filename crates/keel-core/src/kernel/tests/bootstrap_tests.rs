use std::fs;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

use crate::config::model::PluginRole;
use crate::kernel::bootstrap::{Engine, find_project_root};
use crate::kernel::constants;
use crate::kernel::error::Error;
use crate::lifecycle::status::DependencyState;
use crate::mock::{MockProbe, register_mock_plugins};
use crate::plugin_system::catalog::PluginCatalog;

const MANIFEST: &str = r#"
[project]
name = "demo"
version = "1.0.0"

[keel]
dependencies = ["libfoo@1.2.0"]

[keel.provider.fake]
versions = { libfoo = ["1.2.0"] }

[keel.generator.fake-gen]
"#;

struct Workspace {
    dir: TempDir,
    probe: MockProbe,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempdir().expect("Failed to create temp directory");
        fs::create_dir_all(dir.path().join("demo")).unwrap();
        fs::write(dir.path().join("demo").join(constants::MANIFEST_FILE), MANIFEST).unwrap();
        Self {
            dir,
            probe: MockProbe::new(),
        }
    }

    fn root(&self) -> PathBuf {
        self.dir.path().join("demo")
    }

    fn global_config(&self) -> PathBuf {
        self.dir.path().join("xdg/keel/config.toml")
    }

    fn engine(&self) -> Engine {
        let mut catalog = PluginCatalog::new();
        register_mock_plugins(&mut catalog, &self.probe).unwrap();
        Engine::new(catalog)
            .with_home_dir(Some(self.dir.path().join("home")))
            .with_global_config(Some(self.global_config()))
    }

    fn write(&self, path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }
}

#[test]
fn test_engine_lists_plugins() {
    let workspace = Workspace::new();
    let engine = workspace.engine();

    let plugins = engine.plugins();

    assert_eq!(plugins.len(), 3);
    for role in PluginRole::ALL {
        assert_eq!(plugins.by_role(role).len(), 1, "{role}");
    }
    assert!(workspace.probe.events().is_empty());
}

#[test]
fn test_layers_are_read_from_the_standard_locations() {
    let workspace = Workspace::new();
    let engine = workspace.engine();

    let defaults = engine.resolve(&workspace.root()).unwrap();
    assert_eq!(defaults.sync_policy().retry().limit(), constants::DEFAULT_RETRY_LIMIT);

    workspace.write(&workspace.global_config(), "[keel]\nretry-limit = 5\nsync-workers = 8\n");
    let global = engine.resolve(&workspace.root()).unwrap();
    assert_eq!(global.sync_policy().retry().limit(), 5);
    assert_eq!(global.sync_policy().workers(), 8);

    workspace.write(
        &workspace
            .root()
            .join(constants::LOCAL_OVERRIDE_DIR)
            .join(constants::OVERRIDE_FILE),
        "[keel]\nretry-limit = 2\ninstall-path = \"deps\"\n",
    );
    let local = engine.resolve(&workspace.root()).unwrap();
    assert_eq!(local.sync_policy().retry().limit(), 2);
    assert_eq!(local.sync_policy().workers(), 8);
    assert_eq!(local.options().install_path(), workspace.root().join("deps"));
}

#[test]
fn test_invalid_override_is_a_configuration_error() {
    let workspace = Workspace::new();
    let engine = workspace.engine();
    workspace.write(&workspace.global_config(), "[keel]\nsync-workers = 0\n");

    let err = engine.resolve(&workspace.root()).unwrap_err();

    assert!(matches!(err, Error::Config(_)));
    assert_eq!(err.exit_code(), constants::EXIT_CONFIGURATION_ERROR);
}

#[tokio::test]
async fn test_resolve_and_sync_then_status() {
    let workspace = Workspace::new();
    let engine = workspace.engine();

    let before = engine.status(&workspace.root()).unwrap();
    assert_eq!(before.get("libfoo").unwrap().state, DependencyState::NotLocked);

    let result = engine.resolve_and_sync(&workspace.root()).await;
    assert!(result.is_success(), "{:?}", result.error());
    assert_eq!(result.exit_code(), constants::EXIT_SUCCESS);
    assert!(workspace.root().join(constants::LOCK_FILE).is_file());

    let after = engine.status(&workspace.root()).unwrap();
    assert!(after.is_up_to_date());
    assert_eq!(after.install_root, workspace.dir.path().join("home/.keel/fake"));
}

#[tokio::test]
async fn test_update_through_engine() {
    let workspace = Workspace::new();
    let engine = workspace.engine();

    let result = engine.update(&workspace.root()).await;

    assert!(result.is_success(), "{:?}", result.error());
    assert_eq!(workspace.probe.count("update"), 1);
    assert_eq!(workspace.probe.count("resolve"), 0);
}

#[test]
fn test_find_project_root_walks_up() {
    let workspace = Workspace::new();
    let nested = workspace.root().join("src/lib/detail");
    fs::create_dir_all(&nested).unwrap();

    assert_eq!(find_project_root(&nested), Some(workspace.root()));
    assert_eq!(find_project_root(&workspace.root()), Some(workspace.root()));
    assert_eq!(find_project_root(workspace.dir.path()), None);
}
