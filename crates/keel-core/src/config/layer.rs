//! Typed view of one raw configuration layer.
//!
//! A layer is read from a [`ConfigData`] document with every field optional,
//! so the resolver can tell "not set in this layer" apart from a value.
//! Types are checked here; ranges and cross-field rules are checked only after
//! the layers are merged.
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::config::data::ConfigData;
use crate::config::error::ConfigSystemError;
use crate::config::model::{PluginKey, PluginRole};

/// Which layer a document came from, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LayerKind {
    Manifest,
    Global,
    Local,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LayerKind::Manifest => "project manifest",
            LayerKind::Global => "global override",
            LayerKind::Local => "local override",
        };
        write!(f, "{}", label)
    }
}

const PROJECT_KEYS: &[&str] = &["name", "version", "description", "dynamic"];
const KEEL_KEYS: &[&str] = &[
    "version",
    "install-path",
    "cache-path",
    "tool-path",
    "build-path",
    "dependencies",
    "fail-fast",
    "sync-workers",
    "retry-limit",
    "retry-backoff-ms",
    "plugin-timeout-secs",
    "scm",
    "provider",
    "generator",
];

/// The `[project]` table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectTable {
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub dynamic: Vec<String>,
}

/// One `[keel.<role>.<name>]` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginEntry {
    pub enabled: bool,
    pub payload: ConfigData,
}

/// Every setting a single layer may carry.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigLayer {
    pub kind: LayerKind,
    pub project: Option<ProjectTable>,
    pub version: Option<String>,
    pub install_path: Option<PathBuf>,
    pub cache_path: Option<PathBuf>,
    pub tool_path: Option<PathBuf>,
    pub build_path: Option<PathBuf>,
    pub dependencies: Option<Vec<String>>,
    pub fail_fast: Option<bool>,
    pub sync_workers: Option<u64>,
    pub retry_limit: Option<u64>,
    pub retry_backoff_ms: Option<u64>,
    pub plugin_timeout_secs: Option<u64>,
    pub plugins: BTreeMap<PluginKey, PluginEntry>,
}

impl ConfigLayer {
    /// A layer that sets nothing.
    pub fn empty(kind: LayerKind) -> Self {
        Self {
            kind,
            project: None,
            version: None,
            install_path: None,
            cache_path: None,
            tool_path: None,
            build_path: None,
            dependencies: None,
            fail_fast: None,
            sync_workers: None,
            retry_limit: None,
            retry_backoff_ms: None,
            plugin_timeout_secs: None,
            plugins: BTreeMap::new(),
        }
    }

    /// Read a layer document. Unknown top-level tables are ignored so the
    /// manifest can be shared with other tools.
    pub fn from_data(kind: LayerKind, data: &ConfigData) -> Result<Self, ConfigSystemError> {
        let mut layer = Self::empty(kind);

        if let Some(value) = data.value("project") {
            if kind != LayerKind::Manifest {
                return Err(ConfigSystemError::invalid(
                    "project",
                    format!("the [project] table is only allowed in the project manifest, found in the {}", kind),
                ));
            }
            layer.project = Some(read_project(value)?);
        }

        if let Some(value) = data.value("keel") {
            let table = as_table(value, "keel")?;
            check_known_keys(table, "keel", KEEL_KEYS)?;

            layer.version = optional(table, "keel", "version", as_string)?;
            layer.install_path = optional(table, "keel", "install-path", as_string)?.map(PathBuf::from);
            layer.cache_path = optional(table, "keel", "cache-path", as_string)?.map(PathBuf::from);
            layer.tool_path = optional(table, "keel", "tool-path", as_string)?.map(PathBuf::from);
            layer.build_path = optional(table, "keel", "build-path", as_string)?.map(PathBuf::from);
            layer.dependencies = optional(table, "keel", "dependencies", as_string_list)?;
            layer.fail_fast = optional(table, "keel", "fail-fast", as_bool)?;
            layer.sync_workers = optional(table, "keel", "sync-workers", as_unsigned)?;
            layer.retry_limit = optional(table, "keel", "retry-limit", as_unsigned)?;
            layer.retry_backoff_ms = optional(table, "keel", "retry-backoff-ms", as_unsigned)?;
            layer.plugin_timeout_secs = optional(table, "keel", "plugin-timeout-secs", as_unsigned)?;

            for role in PluginRole::ALL {
                if let Some(value) = table.get(role.table_key()) {
                    read_role_table(role, value, &mut layer.plugins)?;
                }
            }
        }

        Ok(layer)
    }
}

fn read_project(value: &Value) -> Result<ProjectTable, ConfigSystemError> {
    let table = as_table(value, "project")?;
    check_known_keys(table, "project", PROJECT_KEYS)?;
    Ok(ProjectTable {
        name: optional(table, "project", "name", as_string)?,
        version: optional(table, "project", "version", as_string)?,
        description: optional(table, "project", "description", as_string)?,
        dynamic: optional(table, "project", "dynamic", as_string_list)?.unwrap_or_default(),
    })
}

fn read_role_table(
    role: PluginRole,
    value: &Value,
    plugins: &mut BTreeMap<PluginKey, PluginEntry>,
) -> Result<(), ConfigSystemError> {
    let role_path = role.field_path();
    let table = as_table(value, &role_path)?;
    for (name, entry) in table {
        let key = PluginKey::new(role, name.clone());
        let field = key.field_path();
        let entry = as_table(entry, &field)?;

        let mut payload = BTreeMap::new();
        let mut enabled = true;
        for (entry_key, entry_value) in entry {
            if entry_key == "enabled" {
                enabled = as_bool(entry_value, &format!("{}.enabled", field))?;
            } else {
                payload.insert(entry_key.clone(), entry_value.clone());
            }
        }

        plugins.insert(
            key,
            PluginEntry {
                enabled,
                payload: ConfigData::from_map(payload),
            },
        );
    }
    Ok(())
}

fn check_known_keys(table: &Map<String, Value>, prefix: &str, known: &[&str]) -> Result<(), ConfigSystemError> {
    match table.keys().find(|key| !known.contains(&key.as_str())) {
        Some(key) => Err(ConfigSystemError::invalid(
            format!("{}.{}", prefix, key),
            "unknown configuration key",
        )),
        None => Ok(()),
    }
}

fn optional<T>(
    table: &Map<String, Value>,
    prefix: &str,
    key: &str,
    read: impl Fn(&Value, &str) -> Result<T, ConfigSystemError>,
) -> Result<Option<T>, ConfigSystemError> {
    table
        .get(key)
        .map(|value| read(value, &format!("{}.{}", prefix, key)))
        .transpose()
}

fn as_table<'a>(value: &'a Value, field: &str) -> Result<&'a Map<String, Value>, ConfigSystemError> {
    value
        .as_object()
        .ok_or_else(|| ConfigSystemError::invalid(field, format!("expected a table, found {}", kind_of(value))))
}

fn as_string(value: &Value, field: &str) -> Result<String, ConfigSystemError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ConfigSystemError::invalid(field, format!("expected a string, found {}", kind_of(value))))
}

fn as_bool(value: &Value, field: &str) -> Result<bool, ConfigSystemError> {
    value
        .as_bool()
        .ok_or_else(|| ConfigSystemError::invalid(field, format!("expected a boolean, found {}", kind_of(value))))
}

fn as_unsigned(value: &Value, field: &str) -> Result<u64, ConfigSystemError> {
    value.as_u64().ok_or_else(|| {
        ConfigSystemError::invalid(
            field,
            format!("expected a non-negative integer, found {}", kind_of(value)),
        )
    })
}

fn as_string_list(value: &Value, field: &str) -> Result<Vec<String>, ConfigSystemError> {
    let items = value
        .as_array()
        .ok_or_else(|| ConfigSystemError::invalid(field, format!("expected an array, found {}", kind_of(value))))?;
    items
        .iter()
        .enumerate()
        .map(|(index, item)| as_string(item, &format!("{}[{}]", field, index)))
        .collect()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(number) if number.is_i64() && number.as_i64().is_some_and(|n| n < 0) => "a negative number",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a table",
    }
}
