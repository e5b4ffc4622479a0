//! Layered configuration resolution.
//!
//! Three layers are merged: the project manifest, the tool-global override and
//! the tool-local override. Scalars take the value of the highest layer that
//! sets them (local > global > manifest). Plugin tables are merged key-wise; a
//! higher layer replaces a whole plugin entry. Validation runs only on the
//! merged result.
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};

use crate::config::data::ConfigData;
use crate::config::error::ConfigSystemError;
use crate::config::layer::{ConfigLayer, LayerKind, PluginEntry, ProjectTable};
use crate::config::model::{
    EngineOptions, PluginConfiguration, PluginKey, PluginRole, ProjectIdentity, ProjectVersion,
    ResolvedConfiguration, RetryPolicy, SyncPolicy,
};
use crate::config::source::{self, ConfigSource, ProjectSources};
use crate::kernel::constants;
use crate::plugin_system::dependency::Requirement;

/// Pick the value of the highest-precedence layer that sets it.
pub fn precedence<T>(manifest: Option<T>, global: Option<T>, local: Option<T>) -> Option<T> {
    local.or(global).or(manifest)
}

/// The merged layers, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedLayers {
    pub project: Option<ProjectTable>,
    pub settings: ConfigLayer,
    /// Each plugin entry with the layer it was taken from
    pub plugins: BTreeMap<PluginKey, (LayerKind, PluginEntry)>,
}

/// Merge three typed layers by precedence.
pub fn merge_layers(manifest: ConfigLayer, global: ConfigLayer, local: ConfigLayer) -> MergedLayers {
    let mut plugins = BTreeMap::new();
    for layer in [&manifest, &global, &local] {
        for (key, entry) in &layer.plugins {
            plugins.insert(key.clone(), (layer.kind, entry.clone()));
        }
    }

    let project = manifest.project.clone();
    let settings = ConfigLayer {
        kind: LayerKind::Local,
        project: None,
        version: precedence(manifest.version, global.version, local.version),
        install_path: precedence(manifest.install_path, global.install_path, local.install_path),
        cache_path: precedence(manifest.cache_path, global.cache_path, local.cache_path),
        tool_path: precedence(manifest.tool_path, global.tool_path, local.tool_path),
        build_path: precedence(manifest.build_path, global.build_path, local.build_path),
        dependencies: precedence(manifest.dependencies, global.dependencies, local.dependencies),
        fail_fast: precedence(manifest.fail_fast, global.fail_fast, local.fail_fast),
        sync_workers: precedence(manifest.sync_workers, global.sync_workers, local.sync_workers),
        retry_limit: precedence(manifest.retry_limit, global.retry_limit, local.retry_limit),
        retry_backoff_ms: precedence(
            manifest.retry_backoff_ms,
            global.retry_backoff_ms,
            local.retry_backoff_ms,
        ),
        plugin_timeout_secs: precedence(
            manifest.plugin_timeout_secs,
            global.plugin_timeout_secs,
            local.plugin_timeout_secs,
        ),
        plugins: BTreeMap::new(),
    };

    MergedLayers {
        project,
        settings,
        plugins,
    }
}

/// Turns raw layer documents into one [`ResolvedConfiguration`].
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    project_root: PathBuf,
    home_dir: Option<PathBuf>,
}

impl ConfigResolver {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            home_dir: source::home_dir(),
        }
    }

    /// Override the home directory used for the default install path.
    pub fn with_home_dir(mut self, home_dir: Option<PathBuf>) -> Self {
        self.home_dir = home_dir;
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Load every layer of `sources` and resolve them.
    pub fn resolve_sources(&self, sources: &ProjectSources) -> Result<ResolvedConfiguration, ConfigSystemError> {
        let manifest = load_source(sources.manifest.as_ref())?;
        let local = load_source(sources.local.as_ref())?;
        let global = load_source(sources.global.as_ref())?;
        self.resolve(manifest, local, global)
    }

    /// Merge the three layer documents; an absent layer counts as empty.
    pub fn resolve(
        &self,
        manifest: Option<ConfigData>,
        local: Option<ConfigData>,
        global: Option<ConfigData>,
    ) -> Result<ResolvedConfiguration, ConfigSystemError> {
        let manifest = read_layer(LayerKind::Manifest, manifest)?;
        let global = read_layer(LayerKind::Global, global)?;
        let local = read_layer(LayerKind::Local, local)?;

        let merged = merge_layers(manifest, global, local);
        check_singular_roles(&merged)?;
        let resolved = self.validate(merged)?;

        info!(
            "Resolved configuration for project '{}' ({} plugin entries, {} requirements)",
            resolved.project().name(),
            resolved.plugins().count(),
            resolved.requirements().len()
        );
        Ok(resolved)
    }

    fn validate(&self, merged: MergedLayers) -> Result<ResolvedConfiguration, ConfigSystemError> {
        let MergedLayers {
            project,
            settings,
            plugins,
        } = merged;

        let project = project.ok_or_else(|| {
            ConfigSystemError::invalid("project", "the project manifest must contain a [project] table")
        })?;
        let identity = resolve_identity(project, settings.version)?;

        let install_path = match settings.install_path {
            Some(path) => self.absolute(path),
            None => match &self.home_dir {
                Some(home) => home.join(constants::DEFAULT_INSTALL_DIR),
                None => {
                    return Err(ConfigSystemError::invalid(
                        "keel.install-path",
                        "no home directory is available; set an explicit install path",
                    ));
                }
            },
        };
        let cache_path = settings
            .cache_path
            .map(|path| self.absolute(path))
            .unwrap_or_else(|| install_path.join(constants::CACHE_DIR_NAME));
        let tool_path = self.absolute(
            settings
                .tool_path
                .unwrap_or_else(|| PathBuf::from(constants::DEFAULT_TOOL_PATH)),
        );
        let build_path = self.absolute(
            settings
                .build_path
                .unwrap_or_else(|| PathBuf::from(constants::DEFAULT_BUILD_PATH)),
        );
        let options = EngineOptions::new(
            install_path,
            cache_path,
            tool_path,
            build_path,
            self.project_root.join(constants::LOCK_FILE),
        );

        let requirements = settings
            .dependencies
            .unwrap_or_default()
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                Requirement::parse(spec).map_err(|err| {
                    ConfigSystemError::invalid(format!("keel.dependencies[{}]", index), err.reason)
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let workers = settings
            .sync_workers
            .unwrap_or(constants::DEFAULT_SYNC_WORKERS as u64);
        let retry_limit = settings
            .retry_limit
            .unwrap_or(u64::from(constants::DEFAULT_RETRY_LIMIT));
        let retry_limit = u32::try_from(retry_limit).map_err(|_| {
            ConfigSystemError::invalid(
                "keel.retry-limit",
                format!("must be at most {}", constants::MAX_RETRY_LIMIT),
            )
        })?;
        let retry = RetryPolicy::new(
            retry_limit,
            Duration::from_millis(
                settings
                    .retry_backoff_ms
                    .unwrap_or(constants::DEFAULT_RETRY_BACKOFF_MS),
            ),
        );
        let sync = SyncPolicy::new(
            settings.fail_fast.unwrap_or(true),
            usize::try_from(workers).unwrap_or(usize::MAX),
            retry,
            Duration::from_secs(
                settings
                    .plugin_timeout_secs
                    .unwrap_or(constants::DEFAULT_PLUGIN_TIMEOUT_SECS),
            ),
        )?;

        let plugins = plugins
            .into_iter()
            .map(|(key, (_, entry))| PluginConfiguration::new(key.role, key.name, entry.enabled, entry.payload))
            .collect::<Result<Vec<_>, _>>()?;

        ResolvedConfiguration::new(
            self.project_root.clone(),
            identity,
            plugins,
            options,
            requirements,
            sync,
        )
    }

    fn absolute(&self, path: PathBuf) -> PathBuf {
        if path.is_absolute() {
            path
        } else {
            self.project_root.join(path)
        }
    }
}

fn load_source(source: &dyn ConfigSource) -> Result<Option<ConfigData>, ConfigSystemError> {
    let data = source.load()?;
    debug!(
        "Configuration source {} is {}",
        source.describe(),
        if data.is_some() { "present" } else { "absent" }
    );
    Ok(data)
}

fn read_layer(kind: LayerKind, data: Option<ConfigData>) -> Result<ConfigLayer, ConfigSystemError> {
    match data {
        Some(data) => ConfigLayer::from_data(kind, &data),
        None => Ok(ConfigLayer::empty(kind)),
    }
}

/// Two enabled plugins of a singular role that were enabled by different
/// layers cannot both win. Several enabled in the same layer are left for
/// the registry to reject.
fn check_singular_roles(merged: &MergedLayers) -> Result<(), ConfigSystemError> {
    for role in PluginRole::ALL {
        let enabled: Vec<(&PluginKey, LayerKind)> = merged
            .plugins
            .iter()
            .filter(|(key, (_, entry))| key.role == role && entry.enabled)
            .map(|(key, (layer, _))| (key, *layer))
            .collect();
        let layers: BTreeSet<LayerKind> = enabled.iter().map(|(_, layer)| *layer).collect();
        if layers.len() > 1 {
            let described = enabled
                .iter()
                .map(|(key, layer)| format!("'{}' ({})", key.name, layer))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ConfigSystemError::conflict(
                role.field_path(),
                format!("only one {} may be enabled, but layers enable {}", role, described),
            ));
        }
    }
    Ok(())
}

fn resolve_identity(project: ProjectTable, override_version: Option<String>) -> Result<ProjectIdentity, ConfigSystemError> {
    let name = project
        .name
        .ok_or_else(|| ConfigSystemError::invalid("project.name", "is required"))?;

    if let Some(entry) = project.dynamic.iter().find(|entry| entry.as_str() != "version") {
        return Err(ConfigSystemError::invalid(
            "project.dynamic",
            format!("'{}' cannot be dynamic; only 'version' is supported", entry),
        ));
    }
    let dynamic = project.dynamic.iter().any(|entry| entry == "version");

    let version = match (project.version, dynamic) {
        (Some(_), true) => {
            return Err(ConfigSystemError::invalid(
                "project.version",
                "must not be set when 'version' is listed in project.dynamic",
            ));
        }
        (None, false) => {
            return Err(ConfigSystemError::invalid(
                "project.version",
                "is required unless 'version' is listed in project.dynamic",
            ));
        }
        (Some(version), false) => {
            if override_version.is_some() {
                return Err(ConfigSystemError::invalid(
                    "keel.version",
                    "only valid when the project version is dynamic",
                ));
            }
            ProjectVersion::Declared(version)
        }
        (None, true) => match override_version {
            Some(version) => ProjectVersion::Declared(version),
            None => ProjectVersion::Dynamic,
        },
    };

    ProjectIdentity::new(name, version, project.description)
}
