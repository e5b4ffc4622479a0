use std::collections::BTreeMap;

use log::{debug, info, warn};

use crate::config::model::{PluginConfiguration, PluginKey, PluginRole, ResolvedConfiguration};
use crate::plugin_system::catalog::{PluginCatalog, PluginFactory};
use crate::plugin_system::dependency::negotiate_sync_format;
use crate::plugin_system::error::{PluginError, PluginSystemError};
use crate::plugin_system::traits::{BuildGenerator, DependencyProvider, Plugin, PluginContext, SourceControlProvider};
use crate::plugin_system::version::{ApiVersion, VersionRange};

/// Metadata of one discovered plugin.
#[derive(Debug, Clone)]
pub struct PluginRecord {
    pub key: PluginKey,
    pub description: Option<String>,
    pub api_range: VersionRange,
    pub sync_formats: Vec<String>,
    pub factory: PluginFactory,
}

/// Discovered plugins grouped by role.
#[derive(Debug, Clone, Default)]
pub struct DiscoveredPlugins {
    records: BTreeMap<PluginKey, PluginRecord>,
}

impl DiscoveredPlugins {
    pub fn get(&self, key: &PluginKey) -> Option<&PluginRecord> {
        self.records.get(key)
    }

    /// Records of one role, in name order
    pub fn by_role(&self, role: PluginRole) -> Vec<&PluginRecord> {
        self.records
            .values()
            .filter(|record| record.key.role == role)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PluginRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Discovers plugins from a catalog and instantiates the configured ones.
#[derive(Debug, Clone)]
pub struct PluginRegistry {
    catalog: PluginCatalog,
    api_version: ApiVersion,
}

impl PluginRegistry {
    pub fn new(catalog: PluginCatalog) -> Self {
        Self::with_api_version(catalog, ApiVersion::CURRENT)
    }

    /// Create a registry that checks plugins against the specified API version
    pub fn with_api_version(catalog: PluginCatalog, api_version: ApiVersion) -> Self {
        Self { catalog, api_version }
    }

    pub fn api_version(&self) -> &ApiVersion {
        &self.api_version
    }

    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    pub fn discover(&self) -> DiscoveredPlugins {
        let records = self
            .catalog
            .iter()
            .map(|registration| {
                let record = PluginRecord {
                    key: registration.key(),
                    description: registration.description().map(str::to_string),
                    api_range: registration.api_range().clone(),
                    sync_formats: registration.sync_formats().to_vec(),
                    factory: registration.factory().clone(),
                };
                (record.key.clone(), record)
            })
            .collect();
        DiscoveredPlugins { records }
    }

    /// Instantiate every enabled plugin of `config`.
    ///
    /// All checks (one plugin per role, every name known, API compatible,
    /// provider and generator agreeing on a sync format) run before the first
    /// factory is called. If a factory fails, the plugins
    /// built so far are released before the error is returned.
    pub fn select(&self, config: &ResolvedConfiguration) -> Result<ActivePlugins, PluginSystemError> {
        let discovered = self.discover();

        let mut chosen: Vec<(&PluginConfiguration, &PluginRecord)> = Vec::new();
        for role in PluginRole::ALL {
            let enabled = config.enabled(role);
            if enabled.len() > 1 {
                return Err(PluginSystemError::DuplicateRole {
                    role,
                    names: enabled.iter().map(|plugin| plugin.name().to_string()).collect(),
                });
            }
            if let Some(plugin) = enabled.first() {
                let record = discovered
                    .get(plugin.key())
                    .ok_or_else(|| PluginSystemError::NotFound {
                        role,
                        name: plugin.name().to_string(),
                    })?;
                chosen.push((plugin, record));
            }
        }

        for (plugin, record) in &chosen {
            if !record.api_range.accepts(&self.api_version) {
                return Err(PluginSystemError::Load {
                    role: plugin.role(),
                    name: plugin.name().to_string(),
                    reason: format!(
                        "plugin requires API {} but the engine provides {}",
                        record.api_range, self.api_version
                    ),
                    source: None,
                });
            }
        }

        let sync_format = self.negotiate(&chosen)?;

        let mut active = ActivePlugins::default();
        active.sync_format = sync_format;
        for (plugin, record) in chosen {
            let context = plugin_context(config, plugin);
            debug!("Instantiating {}", plugin.key());
            // A failed return drops `active`, which releases what was built
            match &record.factory {
                PluginFactory::SourceControl(factory) => {
                    let instance = factory(context).map_err(|err| load_error(plugin, err))?;
                    self.check_instance(plugin, instance.as_ref())?;
                    active.scm = Some(instance);
                }
                PluginFactory::Provider(factory) => {
                    let instance = factory(context).map_err(|err| load_error(plugin, err))?;
                    self.check_instance(plugin, instance.as_ref())?;
                    active.provider = Some(instance);
                }
                PluginFactory::Generator(factory) => {
                    let instance = factory(context).map_err(|err| load_error(plugin, err))?;
                    self.check_instance(plugin, instance.as_ref())?;
                    active.generator = Some(instance);
                }
            }
        }

        info!("Selected plugins: {}", active.describe());
        Ok(active)
    }

    /// The sync format the chosen provider hands to the chosen generator.
    fn negotiate(&self, chosen: &[(&PluginConfiguration, &PluginRecord)]) -> Result<Option<String>, PluginSystemError> {
        let of_role = |role: PluginRole| chosen.iter().find(|(plugin, _)| plugin.role() == role);
        let (Some((provider, produced)), Some((generator, consumed))) =
            (of_role(PluginRole::Provider), of_role(PluginRole::Generator))
        else {
            return Ok(None);
        };
        let format = negotiate_sync_format(&produced.sync_formats, &consumed.sync_formats).map_err(|wanted| {
            PluginSystemError::IncompatiblePlugins {
                provider: provider.name().to_string(),
                generator: generator.name().to_string(),
                wanted,
            }
        })?;
        if let Some(format) = &format {
            debug!("{} and {} agreed on sync format '{}'", provider.key(), generator.key(), format);
        }
        Ok(format)
    }

    /// The instance must agree with its registration about the API.
    fn check_instance<P: Plugin + ?Sized>(&self, config: &PluginConfiguration, instance: &P) -> Result<(), PluginSystemError> {
        if instance
            .compatible_api_versions()
            .iter()
            .any(|range| range.accepts(&self.api_version))
        {
            return Ok(());
        }
        if let Err(err) = instance.shutdown() {
            warn!("Shutdown of rejected plugin {} failed: {}", config.key(), err);
        }
        Err(PluginSystemError::Load {
            role: config.role(),
            name: config.name().to_string(),
            reason: format!("plugin instance is not compatible with API {}", self.api_version),
            source: None,
        })
    }
}

fn plugin_context(config: &ResolvedConfiguration, plugin: &PluginConfiguration) -> PluginContext {
    let options = config.options();
    PluginContext {
        name: plugin.name().to_string(),
        role: plugin.role(),
        project_root: config.project_root().to_path_buf(),
        project: config.project().clone(),
        install_directory: options.plugin_install_dir(plugin.name()),
        tool_directory: options.plugin_tool_dir(plugin.role(), plugin.name()),
        cache_directory: options.plugin_cache_dir(plugin.name()),
        build_directory: options.build_path().to_path_buf(),
        configuration: plugin.payload().clone(),
    }
}

fn load_error(plugin: &PluginConfiguration, err: PluginError) -> PluginSystemError {
    PluginSystemError::load(plugin.role(), plugin.name(), err)
}

/// The plugins instantiated for one run.
///
/// Released in reverse instantiation order, either explicitly through
/// [`release`](Self::release) or when dropped.
#[derive(Default)]
pub struct ActivePlugins {
    scm: Option<Box<dyn SourceControlProvider>>,
    provider: Option<Box<dyn DependencyProvider>>,
    generator: Option<Box<dyn BuildGenerator>>,
    sync_format: Option<String>,
}

impl ActivePlugins {
    /// Format of the sync data the generator expects, if any
    pub fn sync_format(&self) -> Option<&str> {
        self.sync_format.as_deref()
    }

    pub fn source_control(&self) -> Option<&dyn SourceControlProvider> {
        self.scm.as_deref()
    }

    pub fn provider(&self) -> Option<&dyn DependencyProvider> {
        self.provider.as_deref()
    }

    pub fn generator(&self) -> Option<&dyn BuildGenerator> {
        self.generator.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.scm.is_none() && self.provider.is_none() && self.generator.is_none()
    }

    /// `role 'name'` for every live plugin
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(scm) = &self.scm {
            parts.push(format!("{} '{}'", PluginRole::SourceControl, scm.name()));
        }
        if let Some(provider) = &self.provider {
            parts.push(format!("{} '{}'", PluginRole::Provider, provider.name()));
        }
        if let Some(generator) = &self.generator {
            parts.push(format!("{} '{}'", PluginRole::Generator, generator.name()));
        }
        if parts.is_empty() {
            "none".to_string()
        } else {
            parts.join(", ")
        }
    }

    /// Shut down every plugin, generator first. Failures are logged and
    /// returned; they never stop the remaining plugins from being released.
    pub fn release(&mut self) -> Vec<(PluginKey, PluginError)> {
        let mut failures = Vec::new();
        if let Some(generator) = self.generator.take() {
            shutdown(PluginRole::Generator, generator.as_ref(), &mut failures);
        }
        if let Some(provider) = self.provider.take() {
            shutdown(PluginRole::Provider, provider.as_ref(), &mut failures);
        }
        if let Some(scm) = self.scm.take() {
            shutdown(PluginRole::SourceControl, scm.as_ref(), &mut failures);
        }
        failures
    }
}

fn shutdown<P: Plugin + ?Sized>(role: PluginRole, plugin: &P, failures: &mut Vec<(PluginKey, PluginError)>) {
    let key = PluginKey::new(role, plugin.name());
    match plugin.shutdown() {
        Ok(()) => debug!("Released {}", key),
        Err(err) => {
            warn!("Failed to release {}: {}", key, err);
            failures.push((key, err));
        }
    }
}

impl Drop for ActivePlugins {
    fn drop(&mut self) {
        if !self.is_empty() {
            self.release();
        }
    }
}
