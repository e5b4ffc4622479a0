//! In-process fake backends for every plugin role.
//!
//! They behave like real plugins (read a payload, write files into the
//! staging slot they are given) but fetch nothing. Every call is logged to a
//! shared [`MockProbe`] so tests can observe what the engine did.
//!
//! | name       | role           |
//! |------------|----------------|
//! | `fake-scm` | source control |
//! | `fake`     | provider       |
//! | `fake-gen` | generator      |
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::config::data::ConfigData;
use crate::config::model::PluginRole;
use crate::plugin_system::catalog::{PluginCatalog, Registration};
use crate::plugin_system::dependency::{
    GenerationReport, Identification, Requirement, ResolvedDependency, ResolvedDependencySet, StagingSlot,
    SyncData, VersionConstraint, VersionInfo,
};
use crate::plugin_system::error::{PluginError, PluginResult, PluginSystemError};
use crate::plugin_system::traits::{
    BuildGenerator, DependencyProvider, Plugin, PluginContext, SourceControlProvider,
};

pub const FAKE_SCM: &str = "fake-scm";
pub const FAKE_PROVIDER: &str = "fake";
pub const FAKE_GENERATOR: &str = "fake-gen";

/// Name of the file the fake generator writes
pub const GENERATED_FILE: &str = "keel-dependencies.json";

/// Sync format shared by `fake` and `fake-gen`: include directory per dependency
pub const FAKE_SYNC_FORMAT: &str = "fake-include-dirs";

/// Marker the fake provider leaves in its tooling directory
pub const FAKE_TOOLING_FILE: &str = "fake-tool.txt";

const MOCK_VERSION: &str = "0.1.0";

/// Shared call log of the fake plugins.
#[derive(Debug, Clone, Default)]
pub struct MockProbe {
    events: Arc<Mutex<Vec<String>>>,
}

impl MockProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of events starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| event.starts_with(prefix))
            .count()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn parse_payload<T: DeserializeOwned>(data: &ConfigData) -> PluginResult<T> {
    data.parse_into()
        .map_err(|err| PluginError::invalid_configuration(err.to_string()))
}

/// Register `fake-scm`, `fake` and `fake-gen`, all reporting to `probe`.
pub fn register_mock_plugins(catalog: &mut PluginCatalog, probe: &MockProbe) -> Result<(), PluginSystemError> {
    let scm_probe = probe.clone();
    catalog.register(
        Registration::source_control(FAKE_SCM, move |context| {
            let plugin = FakeScm::new(context, scm_probe.clone())?;
            Ok(Box::new(plugin) as Box<dyn SourceControlProvider>)
        })
        .with_description("Reports a configured version for any directory"),
    )?;

    let provider_probe = probe.clone();
    catalog.register(
        Registration::provider(FAKE_PROVIDER, move |context| {
            let plugin = FakeProvider::new(context, provider_probe.clone())?;
            Ok(Box::new(plugin) as Box<dyn DependencyProvider>)
        })
        .with_description("Resolves against an in-memory version table and writes stub headers")
        .with_sync_formats([FAKE_SYNC_FORMAT]),
    )?;

    let generator_probe = probe.clone();
    catalog.register(
        Registration::generator(FAKE_GENERATOR, move |context| {
            let plugin = FakeGenerator::new(context, generator_probe.clone())?;
            Ok(Box::new(plugin) as Box<dyn BuildGenerator>)
        })
        .with_description("Writes a JSON summary of the installed dependencies")
        .with_sync_formats([FAKE_SYNC_FORMAT]),
    )?;
    Ok(())
}

fn shutdown_event(probe: &MockProbe, role: PluginRole, name: &str) -> PluginResult<()> {
    probe.push(format!("shutdown {}.{}", role.table_key(), name));
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
struct FakeScmOptions {
    version: Option<String>,
    revision: Option<String>,
    dirty: bool,
    repository: Option<bool>,
    /// Never answer `is_repository`
    hang: bool,
}

/// Source control that answers from its payload.
pub struct FakeScm {
    name: String,
    options: FakeScmOptions,
    probe: MockProbe,
}

impl FakeScm {
    fn new(context: PluginContext, probe: MockProbe) -> PluginResult<Self> {
        let options: FakeScmOptions = parse_payload(&context.configuration)?;
        probe.push(format!("instantiate scm.{}", context.name));
        Ok(Self {
            name: context.name,
            options,
            probe,
        })
    }
}

impl Plugin for FakeScm {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        MOCK_VERSION
    }

    fn shutdown(&self) -> PluginResult<()> {
        shutdown_event(&self.probe, PluginRole::SourceControl, &self.name)
    }
}

#[async_trait]
impl SourceControlProvider for FakeScm {
    async fn identify(&self, _working_directory: &Path) -> PluginResult<Identification> {
        self.probe.push("identify");
        Ok(match &self.options.version {
            Some(version) => Identification::Identified(VersionInfo {
                version: version.clone(),
                revision: self.options.revision.clone(),
                dirty: self.options.dirty,
            }),
            None => Identification::NotApplicable,
        })
    }

    async fn is_repository(&self, _path: &Path) -> bool {
        if self.options.hang {
            std::future::pending::<()>().await;
        }
        self.options.repository.unwrap_or(true)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
struct FakeProviderOptions {
    /// Published versions per dependency
    versions: BTreeMap<String, Vec<String>>,
    /// Versions that only `update` sees
    updates: BTreeMap<String, Vec<String>>,
    /// Dependencies whose sync always fails
    fail: Vec<String>,
    /// Dependencies whose first N syncs fail transiently
    transient_failures: BTreeMap<String, u32>,
    /// Delay inside every sync, after the first file is written
    delay_ms: u64,
    fail_resolve: bool,
}

/// A dependency provider backed by a version table.
pub struct FakeProvider {
    name: String,
    options: FakeProviderOptions,
    attempts: Mutex<HashMap<String, u32>>,
    probe: MockProbe,
}

impl FakeProvider {
    fn new(context: PluginContext, probe: MockProbe) -> PluginResult<Self> {
        let options: FakeProviderOptions = parse_payload(&context.configuration)?;
        probe.push(format!("instantiate provider.{}", context.name));
        Ok(Self {
            name: context.name,
            options,
            attempts: Mutex::new(HashMap::new()),
            probe,
        })
    }

    fn pick(&self, requirement: &Requirement, include_updates: bool) -> PluginResult<ResolvedDependency> {
        let mut candidates: Vec<String> = self
            .options
            .versions
            .get(requirement.name())
            .cloned()
            .unwrap_or_default();
        if include_updates {
            if let Some(updates) = self.options.updates.get(requirement.name()) {
                candidates.extend(updates.iter().cloned());
            }
        }
        if candidates.is_empty() {
            // Without a table entry only an exact pin can be honoured
            match requirement.constraint() {
                VersionConstraint::Exact(version) => candidates.push(version.to_string()),
                VersionConstraint::Opaque(raw) => candidates.push(raw.clone()),
                _ => {}
            }
        }

        let best = candidates
            .into_iter()
            .filter(|version| requirement.is_satisfied_by(version))
            .max_by(|a, b| match (semver::Version::parse(a), semver::Version::parse(b)) {
                (Ok(a), Ok(b)) => a.cmp(&b),
                _ => a.cmp(b),
            })
            .ok_or_else(|| PluginError::execution(format!("no version of '{}' satisfies the requirement", requirement)))?;

        Ok(ResolvedDependency::new(requirement.name(), best.clone())
            .with_source(format!("fake://{}/{}", requirement.name(), best)))
    }

    fn resolve_all(&self, requirements: &[Requirement], include_updates: bool) -> PluginResult<ResolvedDependencySet> {
        if self.options.fail_resolve {
            return Err(PluginError::execution("resolution failed"));
        }
        requirements
            .iter()
            .map(|requirement| self.pick(requirement, include_updates))
            .collect()
    }
}

impl Plugin for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        MOCK_VERSION
    }

    fn shutdown(&self) -> PluginResult<()> {
        shutdown_event(&self.probe, PluginRole::Provider, &self.name)
    }
}

#[async_trait]
impl DependencyProvider for FakeProvider {
    async fn resolve(&self, requirements: &[Requirement]) -> PluginResult<ResolvedDependencySet> {
        self.probe.push("resolve");
        self.resolve_all(requirements, false)
    }

    async fn sync(&self, dependency: &ResolvedDependency, slot: StagingSlot<'_>) -> PluginResult<()> {
        self.probe.push(format!("sync {}", dependency.name));

        let include = slot.path().join("include");
        tokio::fs::create_dir_all(&include).await?;
        let guard = dependency.name.to_uppercase().replace('-', "_");
        let header = format!(
            "#pragma once\n#define {}_VERSION \"{}\"\n",
            guard, dependency.version
        );
        tokio::fs::write(include.join(format!("{}.h", dependency.name)), header).await?;

        if self.options.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.options.delay_ms)).await;
        }

        if self.options.fail.contains(&dependency.name) {
            return Err(PluginError::execution(format!("cannot fetch {}", dependency.name)));
        }
        if let Some(limit) = self.options.transient_failures.get(&dependency.name) {
            let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
            let seen = attempts.entry(dependency.name.clone()).or_insert(0);
            *seen += 1;
            if *seen <= *limit {
                return Err(PluginError::transient(format!(
                    "mirror busy for {} (attempt {})",
                    dependency.name, seen
                )));
            }
        }

        let library = slot.path().join("lib");
        tokio::fs::create_dir_all(&library).await?;
        tokio::fs::write(library.join(format!("lib{}.a", dependency.name)), dependency.version.as_bytes()).await?;
        Ok(())
    }

    async fn update(&self, requirements: &[Requirement], _install_root: &Path) -> PluginResult<ResolvedDependencySet> {
        self.probe.push("update");
        self.resolve_all(requirements, true)
    }

    async fn prepare_tooling(&self, tool_directory: &Path) -> PluginResult<()> {
        self.probe.push(format!("prepare-tooling provider.{}", self.name));
        let marker = tool_directory.join(FAKE_TOOLING_FILE);
        if !tokio::fs::try_exists(&marker).await? {
            tokio::fs::create_dir_all(tool_directory).await?;
            tokio::fs::write(&marker, MOCK_VERSION).await?;
        }
        Ok(())
    }

    async fn sync_data(
        &self,
        format: &str,
        dependencies: &ResolvedDependencySet,
        install_root: &Path,
    ) -> PluginResult<SyncData> {
        self.probe.push("sync-data");
        if format != FAKE_SYNC_FORMAT {
            return Err(PluginError::NotSupported(format!("sync data in format '{}'", format)));
        }
        let include_dirs: BTreeMap<&str, PathBuf> = dependencies
            .iter()
            .map(|dep| (dep.name.as_str(), install_root.join(&dep.name).join("include")))
            .collect();
        let mut payload = ConfigData::new();
        payload
            .set("include-dirs", include_dirs)
            .map_err(|err| PluginError::execution(err.to_string()))?;
        Ok(SyncData {
            provider: self.name.clone(),
            format: FAKE_SYNC_FORMAT.to_string(),
            payload,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
struct FakeGeneratorOptions {
    fail: bool,
}

/// Writes the installed dependencies as a JSON document.
pub struct FakeGenerator {
    name: String,
    project: String,
    options: FakeGeneratorOptions,
    probe: MockProbe,
}

impl FakeGenerator {
    fn new(context: PluginContext, probe: MockProbe) -> PluginResult<Self> {
        let options: FakeGeneratorOptions = parse_payload(&context.configuration)?;
        probe.push(format!("instantiate generator.{}", context.name));
        Ok(Self {
            name: context.name,
            project: context.project.name().to_string(),
            options,
            probe,
        })
    }
}

impl Plugin for FakeGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        MOCK_VERSION
    }

    fn shutdown(&self) -> PluginResult<()> {
        shutdown_event(&self.probe, PluginRole::Generator, &self.name)
    }
}

impl FakeGenerator {
    fn include_dirs(sync_data: Option<&SyncData>) -> PluginResult<BTreeMap<String, PathBuf>> {
        let Some(data) = sync_data else {
            return Err(PluginError::invalid_configuration("no sync data from the provider"));
        };
        data.payload
            .get("include-dirs")
            .ok_or_else(|| PluginError::Integrity(format!("sync data from '{}' has no include-dirs", data.provider)))
    }
}

#[async_trait]
impl BuildGenerator for FakeGenerator {
    async fn prepare_tooling(&self, _tool_directory: &Path) -> PluginResult<()> {
        self.probe.push(format!("prepare-tooling generator.{}", self.name));
        Ok(())
    }

    async fn generate(
        &self,
        dependencies: &ResolvedDependencySet,
        _install_root: &Path,
        sync_data: Option<&SyncData>,
        output: StagingSlot<'_>,
    ) -> PluginResult<GenerationReport> {
        self.probe.push("generate");
        let include_dirs = Self::include_dirs(sync_data)?;
        // Partial output first, so a failure leaves something to discard
        tokio::fs::write(output.path().join("partial.txt"), b"").await?;
        if self.options.fail {
            return Err(PluginError::execution("generator failed"));
        }
        tokio::fs::remove_file(output.path().join("partial.txt")).await?;

        let entries: Vec<serde_json::Value> = dependencies
            .iter()
            .map(|dep| {
                serde_json::json!({
                    "name": dep.name,
                    "version": dep.version,
                    "include": include_dirs.get(&dep.name),
                })
            })
            .collect();
        let document = serde_json::json!({
            "project": self.project,
            "dependencies": entries,
        });
        let mut contents = serde_json::to_vec_pretty(&document)
            .map_err(|err| PluginError::execution(err.to_string()))?;
        contents.push(b'\n');
        tokio::fs::write(output.path().join(GENERATED_FILE), contents).await?;

        Ok(GenerationReport::new(
            self.name.clone(),
            output.destination(),
            vec![PathBuf::from(GENERATED_FILE)],
        ))
    }
}
