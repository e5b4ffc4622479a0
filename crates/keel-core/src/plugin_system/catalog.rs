//! The explicit registration table of known plugins.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::config::model::{PluginKey, PluginRole};
use crate::plugin_system::error::{PluginResult, PluginSystemError};
use crate::plugin_system::traits::{BuildGenerator, DependencyProvider, PluginContext, SourceControlProvider};
use crate::plugin_system::version::{ApiVersion, VersionRange};

pub type Factory<T> = Arc<dyn Fn(PluginContext) -> PluginResult<Box<T>> + Send + Sync>;

/// Constructor for a plugin of one role.
#[derive(Clone)]
pub enum PluginFactory {
    SourceControl(Factory<dyn SourceControlProvider>),
    Provider(Factory<dyn DependencyProvider>),
    Generator(Factory<dyn BuildGenerator>),
}

impl PluginFactory {
    pub fn role(&self) -> PluginRole {
        match self {
            PluginFactory::SourceControl(_) => PluginRole::SourceControl,
            PluginFactory::Provider(_) => PluginRole::Provider,
            PluginFactory::Generator(_) => PluginRole::Generator,
        }
    }
}

impl fmt::Debug for PluginFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PluginFactory({})", self.role())
    }
}

/// One entry of the catalog.
#[derive(Debug, Clone)]
pub struct Registration {
    name: String,
    description: Option<String>,
    api_range: VersionRange,
    sync_formats: Vec<String>,
    factory: PluginFactory,
}

impl Registration {
    fn new(name: impl Into<String>, factory: PluginFactory) -> Self {
        Self {
            name: name.into(),
            description: None,
            api_range: VersionRange::caret(&ApiVersion::CURRENT),
            sync_formats: Vec::new(),
            factory,
        }
    }

    pub fn source_control<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(PluginContext) -> PluginResult<Box<dyn SourceControlProvider>> + Send + Sync + 'static,
    {
        Self::new(name, PluginFactory::SourceControl(Arc::new(factory)))
    }

    pub fn provider<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(PluginContext) -> PluginResult<Box<dyn DependencyProvider>> + Send + Sync + 'static,
    {
        Self::new(name, PluginFactory::Provider(Arc::new(factory)))
    }

    pub fn generator<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(PluginContext) -> PluginResult<Box<dyn BuildGenerator>> + Send + Sync + 'static,
    {
        Self::new(name, PluginFactory::Generator(Arc::new(factory)))
    }

    /// Declare the engine API range this plugin was built for
    pub fn with_api_range(mut self, range: VersionRange) -> Self {
        self.api_range = range;
        self
    }

    /// Sync data formats: those a provider can produce, or those a generator
    /// consumes in order of preference.
    pub fn with_sync_formats<I, S>(mut self, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sync_formats = formats.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> PluginRole {
        self.factory.role()
    }

    pub fn key(&self) -> PluginKey {
        PluginKey::new(self.role(), self.name.clone())
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn api_range(&self) -> &VersionRange {
        &self.api_range
    }

    pub fn sync_formats(&self) -> &[String] {
        &self.sync_formats
    }

    pub fn factory(&self) -> &PluginFactory {
        &self.factory
    }
}

/// Role and name to registration. Built once, typically at startup.
#[derive(Debug, Clone, Default)]
pub struct PluginCatalog {
    entries: BTreeMap<PluginKey, Registration>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a registration; a second one for the same role and name is rejected.
    pub fn register(&mut self, registration: Registration) -> Result<(), PluginSystemError> {
        let key = registration.key();
        if self.entries.contains_key(&key) {
            return Err(PluginSystemError::DuplicateRegistration {
                role: key.role,
                name: key.name,
            });
        }
        debug!("Registered {} (API {})", key, registration.api_range());
        self.entries.insert(key, registration);
        Ok(())
    }

    pub fn get(&self, key: &PluginKey) -> Option<&Registration> {
        self.entries.get(key)
    }

    /// Registrations in role, then name order
    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
