//! Git source-control plugin.
//!
//! Registered as the `git` source-control plugin. It never writes to the
//! repository: it looks for a `.git` entry above the project root and asks
//! `git describe` for the nearest tag.
//!
//! Payload (`[keel.scm.git]`):
//!
//! ```toml
//! [keel.scm.git]
//! program = "git"     # git executable
//! tag-prefix = "v"    # stripped from tags before they become versions
//! ```
use std::path::Path;

use async_trait::async_trait;
use keel_core::plugin_system::catalog::{PluginCatalog, Registration};
use keel_core::plugin_system::dependency::{Identification, VersionInfo};
use keel_core::plugin_system::error::{PluginError, PluginResult, PluginSystemError};
use keel_core::plugin_system::traits::{Plugin, PluginContext, SourceControlProvider};
use keel_core::plugin_system::version::VersionRange;
use log::{debug, info};
use serde::Deserialize;
use tokio::process::Command;

pub const PLUGIN_NAME: &str = "git";

const COMPATIBLE_API_REQ: &str = "^0.1";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
struct GitOptions {
    program: String,
    tag_prefix: String,
}

impl Default for GitOptions {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
            tag_prefix: "v".to_string(),
        }
    }
}

pub struct GitScm {
    options: GitOptions,
}

impl GitScm {
    pub fn new(context: PluginContext) -> PluginResult<Self> {
        let options: GitOptions = context
            .configuration
            .parse_into()
            .map_err(|e| PluginError::invalid_configuration(e.to_string()))?;
        debug!("git plugin using '{}' for {}", options.program, context.project_root.display());
        Ok(Self { options })
    }

    async fn git(&self, working_directory: &Path, args: &[&str]) -> PluginResult<Option<String>> {
        let output = Command::new(&self.options.program)
            .args(args)
            .current_dir(working_directory)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PluginError::execution(format!("cannot run {}: {}", self.options.program, e)))?;
        if !output.status.success() {
            debug!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }
}

/// Parse `git describe --tags --dirty --long` output,
/// e.g. `v1.2.3-4-gdeadbee-dirty`.
pub fn parse_describe(output: &str, tag_prefix: &str) -> Option<VersionInfo> {
    let output = output.trim();
    let (output, dirty) = match output.strip_suffix("-dirty") {
        Some(rest) => (rest, true),
        None => (output, false),
    };

    // Tags may contain '-', so split from the right
    let mut parts = output.rsplitn(3, '-');
    let hash = parts.next()?.strip_prefix('g')?;
    let distance: u64 = parts.next()?.parse().ok()?;
    let tag = parts.next()?;
    let version = tag.strip_prefix(tag_prefix).unwrap_or(tag);
    if version.is_empty() {
        return None;
    }

    let version = if distance == 0 {
        version.to_string()
    } else {
        format!("{}+{}.g{}", version, distance, hash)
    };
    Some(VersionInfo {
        version,
        revision: Some(hash.to_string()),
        dirty,
    })
}

impl Plugin for GitScm {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn compatible_api_versions(&self) -> Vec<VersionRange> {
        match VersionRange::from_constraint(COMPATIBLE_API_REQ) {
            Ok(range) => vec![range],
            Err(e) => {
                log::error!(
                    "Failed to parse API version requirement ('{}') for {}: {}",
                    COMPATIBLE_API_REQ,
                    self.name(),
                    e
                );
                vec![]
            }
        }
    }
}

#[async_trait]
impl SourceControlProvider for GitScm {
    async fn identify(&self, working_directory: &Path) -> PluginResult<Identification> {
        let described = self
            .git(working_directory, &["describe", "--tags", "--dirty", "--long"])
            .await?;
        let Some(described) = described else {
            info!("No git tag found above {}", working_directory.display());
            return Ok(Identification::NotApplicable);
        };
        Ok(match parse_describe(&described, &self.options.tag_prefix) {
            Some(info) => Identification::Identified(info),
            None => {
                info!("Cannot derive a version from '{}'", described);
                Identification::NotApplicable
            }
        })
    }

    async fn is_repository(&self, path: &Path) -> bool {
        path.ancestors().any(|dir| dir.join(".git").exists())
    }
}

/// Add the git plugin to `catalog`.
pub fn register(catalog: &mut PluginCatalog) -> Result<(), PluginSystemError> {
    catalog.register(
        Registration::source_control(PLUGIN_NAME, |context| {
            Ok(Box::new(GitScm::new(context)?) as Box<dyn SourceControlProvider>)
        })
        .with_description("Derives the project version from the nearest git tag"),
    )
}

#[cfg(test)]
mod tests {
    use std::fs;

    use keel_core::config::data::ConfigData;
    use keel_core::config::model::{PluginRole, ProjectIdentity, ProjectVersion};
    use keel_core::plugin_system::version::ApiVersion;
    use tempfile::tempdir;

    use super::*;

    fn context(root: &Path, configuration: ConfigData) -> PluginContext {
        PluginContext {
            name: PLUGIN_NAME.to_string(),
            role: PluginRole::SourceControl,
            project_root: root.to_path_buf(),
            project: ProjectIdentity::new("demo", ProjectVersion::Declared("1.0.0".to_string()), None).unwrap(),
            install_directory: root.join("deps/git"),
            tool_directory: root.join("tool/keel/scm/git"),
            cache_directory: root.join("deps/.cache/git"),
            build_directory: root.join("build"),
            configuration,
        }
    }

    #[test]
    fn test_parse_exact_tag() {
        let info = parse_describe("v1.2.3-0-gdeadbee\n", "v").unwrap();
        assert_eq!(info.version, "1.2.3");
        assert_eq!(info.revision.as_deref(), Some("deadbee"));
        assert!(!info.dirty);
    }

    #[test]
    fn test_parse_tag_with_distance_and_dirty() {
        let info = parse_describe("release-2.0-rc1-4-gabc1234-dirty", "release-").unwrap();
        assert_eq!(info.version, "2.0-rc1+4.gabc1234");
        assert!(info.dirty);
    }

    #[test]
    fn test_parse_rejects_bare_hash() {
        assert!(parse_describe("abc1234", "v").is_none());
        assert!(parse_describe("v-0-gabc1234", "v").is_none());
    }

    #[test]
    fn test_registration_and_options() {
        let mut catalog = PluginCatalog::new();
        register(&mut catalog).unwrap();
        assert_eq!(catalog.len(), 1);

        let temp_dir = tempdir().unwrap();
        let mut payload = ConfigData::new();
        payload.set("colour", "blue").unwrap();
        assert!(matches!(
            GitScm::new(context(temp_dir.path(), payload)),
            Err(PluginError::InvalidConfiguration(_))
        ));

        let plugin = GitScm::new(context(temp_dir.path(), ConfigData::new())).unwrap();
        assert!(
            plugin
                .compatible_api_versions()
                .iter()
                .any(|range| range.accepts(&ApiVersion::CURRENT))
        );
    }

    #[tokio::test]
    async fn test_is_repository_looks_at_ancestors() {
        let temp_dir = tempdir().unwrap();
        let plugin = GitScm::new(context(temp_dir.path(), ConfigData::new())).unwrap();
        let nested = temp_dir.path().join("repo/src/module");
        fs::create_dir_all(&nested).unwrap();

        assert!(!plugin.is_repository(&nested).await);

        fs::create_dir_all(temp_dir.path().join("repo/.git")).unwrap();
        assert!(plugin.is_repository(&nested).await);
    }

    #[tokio::test]
    async fn test_missing_program_is_an_execution_error() {
        let temp_dir = tempdir().unwrap();
        let mut payload = ConfigData::new();
        payload.set("program", "keel-no-such-git-binary").unwrap();
        let plugin = GitScm::new(context(temp_dir.path(), payload)).unwrap();

        let err = plugin.identify(temp_dir.path()).await.unwrap_err();

        assert!(matches!(err, PluginError::Execution(_)));
    }
}
