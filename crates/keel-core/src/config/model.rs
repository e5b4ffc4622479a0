//! Validated configuration value objects.
//!
//! Everything in this module is immutable after construction: fields are
//! private, constructors validate, and accessors only borrow.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::data::ConfigData;
use crate::config::error::ConfigSystemError;
use crate::kernel::constants;
use crate::plugin_system::dependency::Requirement;

/// The three plugin roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PluginRole {
    SourceControl,
    Provider,
    Generator,
}

impl PluginRole {
    pub const ALL: [PluginRole; 3] = [PluginRole::SourceControl, PluginRole::Provider, PluginRole::Generator];

    /// Key of the role table below `[keel]`
    pub fn table_key(&self) -> &'static str {
        match self {
            PluginRole::SourceControl => "scm",
            PluginRole::Provider => "provider",
            PluginRole::Generator => "generator",
        }
    }

    /// Directory name used for per-plugin tool directories
    pub fn directory_name(&self) -> &'static str {
        match self {
            PluginRole::SourceControl => "scm",
            PluginRole::Provider => "providers",
            PluginRole::Generator => "generators",
        }
    }

    pub fn from_table_key(key: &str) -> Option<Self> {
        PluginRole::ALL
            .into_iter()
            .find(|role| role.table_key() == key)
    }

    /// Field path of the role table
    pub fn field_path(&self) -> String {
        format!("keel.{}", self.table_key())
    }
}

impl fmt::Display for PluginRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PluginRole::SourceControl => "source-control",
            PluginRole::Provider => "provider",
            PluginRole::Generator => "generator",
        };
        write!(f, "{}", label)
    }
}

/// A plugin is identified by its role and its name within that role.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PluginKey {
    pub role: PluginRole,
    pub name: String,
}

impl PluginKey {
    pub fn new(role: PluginRole, name: impl Into<String>) -> Self {
        Self { role, name: name.into() }
    }

    pub fn field_path(&self) -> String {
        format!("keel.{}.{}", self.role.table_key(), self.name)
    }
}

impl fmt::Display for PluginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.role, self.name)
    }
}

/// Check a plugin name: non-empty, no whitespace or path separators.
pub fn validate_plugin_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("plugin name is empty".to_string());
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(format!("plugin name '{}' must not contain path separators or '..'", name));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(format!("plugin name '{}' must not contain whitespace", name));
    }
    Ok(())
}

/// A project version, either declared or derived from source control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectVersion {
    Declared(String),
    Dynamic,
}

impl fmt::Display for ProjectVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectVersion::Declared(version) => write!(f, "{}", version),
            ProjectVersion::Dynamic => write!(f, "<dynamic>"),
        }
    }
}

/// Name, version and description of the project being managed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectIdentity {
    name: String,
    version: ProjectVersion,
    description: Option<String>,
}

impl ProjectIdentity {
    pub fn new(
        name: impl Into<String>,
        version: ProjectVersion,
        description: Option<String>,
    ) -> Result<Self, ConfigSystemError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigSystemError::invalid("project.name", "must not be empty"));
        }
        if name.contains('/') || name.contains('\\') || name.chars().any(char::is_whitespace) {
            return Err(ConfigSystemError::invalid(
                "project.name",
                format!("'{}' must not contain whitespace or path separators", name),
            ));
        }
        if let ProjectVersion::Declared(version) = &version {
            if version.trim().is_empty() {
                return Err(ConfigSystemError::invalid("project.version", "must not be empty"));
            }
        }
        Ok(Self {
            name,
            version,
            description,
        })
    }

    /// A new identity carrying a concrete version; `self` is left untouched.
    pub fn with_version(&self, version: impl Into<String>) -> Result<Self, ConfigSystemError> {
        Self::new(
            self.name.clone(),
            ProjectVersion::Declared(version.into()),
            self.description.clone(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &ProjectVersion {
        &self.version
    }

    /// The concrete version, if it is already known.
    pub fn version_str(&self) -> Option<&str> {
        match &self.version {
            ProjectVersion::Declared(version) => Some(version),
            ProjectVersion::Dynamic => None,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        self.version == ProjectVersion::Dynamic
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// The resolved configuration of a single plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginConfiguration {
    key: PluginKey,
    enabled: bool,
    payload: ConfigData,
}

impl PluginConfiguration {
    pub fn new(
        role: PluginRole,
        name: impl Into<String>,
        enabled: bool,
        payload: ConfigData,
    ) -> Result<Self, ConfigSystemError> {
        let key = PluginKey::new(role, name);
        validate_plugin_name(&key.name).map_err(|reason| ConfigSystemError::invalid(key.field_path(), reason))?;
        Ok(Self { key, enabled, payload })
    }

    pub fn key(&self) -> &PluginKey {
        &self.key
    }

    pub fn role(&self) -> PluginRole {
        self.key.role
    }

    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn payload(&self) -> &ConfigData {
        &self.payload
    }
}

/// Retry schedule for transient sync failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    limit: u32,
    backoff: Duration,
}

impl RetryPolicy {
    pub fn new(limit: u32, backoff: Duration) -> Self {
        Self { limit, backoff }
    }

    /// Number of retries after the first attempt
    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Delay before retry number `retry` (1-based): the base backoff doubled
    /// for every earlier retry, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let delay = self.backoff.saturating_mul(1u32 << exponent);
        delay.min(Duration::from_millis(constants::MAX_RETRY_DELAY_MS))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            constants::DEFAULT_RETRY_LIMIT,
            Duration::from_millis(constants::DEFAULT_RETRY_BACKOFF_MS),
        )
    }
}

/// How the sync phase behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    fail_fast: bool,
    workers: usize,
    retry: RetryPolicy,
    plugin_timeout: Duration,
}

impl SyncPolicy {
    pub fn new(
        fail_fast: bool,
        workers: usize,
        retry: RetryPolicy,
        plugin_timeout: Duration,
    ) -> Result<Self, ConfigSystemError> {
        if workers == 0 || workers > constants::MAX_SYNC_WORKERS {
            return Err(ConfigSystemError::invalid(
                "keel.sync-workers",
                format!("must be between 1 and {}, got {}", constants::MAX_SYNC_WORKERS, workers),
            ));
        }
        if retry.limit() > constants::MAX_RETRY_LIMIT {
            return Err(ConfigSystemError::invalid(
                "keel.retry-limit",
                format!("must be at most {}, got {}", constants::MAX_RETRY_LIMIT, retry.limit()),
            ));
        }
        if plugin_timeout.is_zero() {
            return Err(ConfigSystemError::invalid("keel.plugin-timeout-secs", "must be greater than zero"));
        }
        Ok(Self {
            fail_fast,
            workers,
            retry,
            plugin_timeout,
        })
    }

    pub fn fail_fast(&self) -> bool {
        self.fail_fast
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    pub fn plugin_timeout(&self) -> Duration {
        self.plugin_timeout
    }
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            fail_fast: true,
            workers: constants::DEFAULT_SYNC_WORKERS,
            retry: RetryPolicy::default(),
            plugin_timeout: Duration::from_secs(constants::DEFAULT_PLUGIN_TIMEOUT_SECS),
        }
    }
}

/// Absolute directories the engine works in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    install_path: PathBuf,
    cache_path: PathBuf,
    tool_path: PathBuf,
    build_path: PathBuf,
    lock_path: PathBuf,
}

impl EngineOptions {
    pub fn new(
        install_path: PathBuf,
        cache_path: PathBuf,
        tool_path: PathBuf,
        build_path: PathBuf,
        lock_path: PathBuf,
    ) -> Self {
        Self {
            install_path,
            cache_path,
            tool_path,
            build_path,
            lock_path,
        }
    }

    pub fn install_path(&self) -> &Path {
        &self.install_path
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn tool_path(&self) -> &Path {
        &self.tool_path
    }

    pub fn build_path(&self) -> &Path {
        &self.build_path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// `<install-path>/<plugin-name>`
    pub fn plugin_install_dir(&self, name: &str) -> PathBuf {
        self.install_path.join(name)
    }

    /// `<tool-path>/keel/<role-dir>/<plugin-name>`
    pub fn plugin_tool_dir(&self, role: PluginRole, name: &str) -> PathBuf {
        self.tool_path
            .join(constants::TOOL_DIR_NAME)
            .join(role.directory_name())
            .join(name)
    }

    /// `<cache-path>/<plugin-name>`
    pub fn plugin_cache_dir(&self, name: &str) -> PathBuf {
        self.cache_path.join(name)
    }
}

/// The single validated configuration of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfiguration {
    project_root: PathBuf,
    project: ProjectIdentity,
    plugins: BTreeMap<PluginKey, PluginConfiguration>,
    options: EngineOptions,
    requirements: Vec<Requirement>,
    sync: SyncPolicy,
}

impl ResolvedConfiguration {
    /// Build and cross-validate a resolved configuration.
    pub fn new(
        project_root: PathBuf,
        project: ProjectIdentity,
        plugins: impl IntoIterator<Item = PluginConfiguration>,
        options: EngineOptions,
        requirements: Vec<Requirement>,
        sync: SyncPolicy,
    ) -> Result<Self, ConfigSystemError> {
        let plugins: BTreeMap<PluginKey, PluginConfiguration> = plugins
            .into_iter()
            .map(|plugin| (plugin.key().clone(), plugin))
            .collect();

        let enabled_of = |role: PluginRole| {
            plugins
                .values()
                .filter(|plugin| plugin.role() == role && plugin.is_enabled())
                .count()
        };

        if enabled_of(PluginRole::Provider) == 0 {
            return Err(ConfigSystemError::invalid(
                PluginRole::Provider.field_path(),
                "at least one dependency provider must be enabled",
            ));
        }
        if enabled_of(PluginRole::Generator) == 0 {
            return Err(ConfigSystemError::invalid(
                PluginRole::Generator.field_path(),
                "at least one build generator must be enabled",
            ));
        }
        if project.is_dynamic() && enabled_of(PluginRole::SourceControl) == 0 {
            return Err(ConfigSystemError::invalid(
                "project.version",
                "version is dynamic but neither keel.version nor an enabled source-control plugin can provide it",
            ));
        }

        let mut seen = BTreeSet::new();
        for requirement in &requirements {
            if !seen.insert(requirement.name()) {
                return Err(ConfigSystemError::invalid(
                    "keel.dependencies",
                    format!("dependency '{}' is listed more than once", requirement.name()),
                ));
            }
        }

        Ok(Self {
            project_root,
            project,
            plugins,
            options,
            requirements,
            sync,
        })
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn project(&self) -> &ProjectIdentity {
        &self.project
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn sync_policy(&self) -> &SyncPolicy {
        &self.sync
    }

    /// All plugin configurations, enabled or not, in key order.
    pub fn plugins(&self) -> impl Iterator<Item = &PluginConfiguration> {
        self.plugins.values()
    }

    pub fn plugin(&self, key: &PluginKey) -> Option<&PluginConfiguration> {
        self.plugins.get(key)
    }

    /// Enabled plugins of `role`, in name order.
    pub fn enabled(&self, role: PluginRole) -> Vec<&PluginConfiguration> {
        self.plugins
            .values()
            .filter(|plugin| plugin.role() == role && plugin.is_enabled())
            .collect()
    }
}
