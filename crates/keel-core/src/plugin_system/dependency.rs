//! Dependency value types shared between the engine and provider plugins.
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::data::ConfigData;

/// A requirement string that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid dependency requirement '{spec}': {reason}")]
pub struct InvalidRequirement {
    pub spec: String,
    pub reason: String,
}

/// Check that a dependency name is usable as a single directory component
/// below the install root.
pub fn validate_dependency_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("dependency name is empty".to_string());
    }
    if name == "." || name == ".." || name.contains("..") {
        return Err(format!("dependency name '{}' must not contain '..'", name));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(format!("dependency name '{}' must not contain path separators", name));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(format!("dependency name '{}' must not contain whitespace", name));
    }
    if name.starts_with('.') {
        return Err(format!("dependency name '{}' must not start with '.'", name));
    }
    Ok(())
}

/// The version part of a requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// No constraint given
    Any,
    /// A plain semantic version, matched exactly
    Exact(Version),
    /// A semver requirement such as `^1.2` or `>=1.0, <2`
    Range(VersionReq),
    /// Anything else, compared as a string
    Opaque(String),
}

impl VersionConstraint {
    pub fn parse(constraint: &str) -> Self {
        let constraint = constraint.trim();
        if constraint.is_empty() || constraint == "*" {
            return VersionConstraint::Any;
        }
        if let Ok(version) = Version::parse(constraint) {
            return VersionConstraint::Exact(version);
        }
        match VersionReq::parse(constraint) {
            Ok(req) => VersionConstraint::Range(req),
            Err(_) => VersionConstraint::Opaque(constraint.to_string()),
        }
    }

    /// Whether a resolved version string satisfies this constraint.
    pub fn matches(&self, version: &str) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::Exact(expected) => match Version::parse(version) {
                Ok(actual) => &actual == expected,
                Err(_) => expected.to_string() == version,
            },
            VersionConstraint::Range(req) => Version::parse(version)
                .map(|actual| req.matches(&actual))
                .unwrap_or(false),
            VersionConstraint::Opaque(expected) => expected == version,
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Any => write!(f, "*"),
            VersionConstraint::Exact(version) => write!(f, "{}", version),
            VersionConstraint::Range(req) => write!(f, "{}", req),
            VersionConstraint::Opaque(raw) => write!(f, "{}", raw),
        }
    }
}

/// A declared project dependency, written `name[@constraint]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    name: String,
    constraint: VersionConstraint,
}

impl Requirement {
    pub fn new(name: impl Into<String>, constraint: VersionConstraint) -> Result<Self, InvalidRequirement> {
        let name = name.into();
        validate_dependency_name(&name).map_err(|reason| InvalidRequirement {
            spec: name.clone(),
            reason,
        })?;
        Ok(Self { name, constraint })
    }

    pub fn parse(spec: &str) -> Result<Self, InvalidRequirement> {
        let trimmed = spec.trim();
        let (name, constraint) = match trimmed.split_once('@') {
            Some((name, constraint)) => {
                if constraint.trim().is_empty() {
                    return Err(InvalidRequirement {
                        spec: spec.to_string(),
                        reason: "empty version constraint after '@'".to_string(),
                    });
                }
                (name.trim(), VersionConstraint::parse(constraint))
            }
            None => (trimmed, VersionConstraint::Any),
        };
        validate_dependency_name(name).map_err(|reason| InvalidRequirement {
            spec: spec.to_string(),
            reason,
        })?;
        Ok(Self {
            name: name.to_string(),
            constraint,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn constraint(&self) -> &VersionConstraint {
        &self.constraint
    }

    pub fn is_satisfied_by(&self, version: &str) -> bool {
        self.constraint.matches(version)
    }
}

impl FromStr for Requirement {
    type Err = InvalidRequirement;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Requirement::parse(s)
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.constraint {
            VersionConstraint::Any => write!(f, "{}", self.name),
            _ => write!(f, "{}@{}", self.name, self.constraint),
        }
    }
}

/// One dependency pinned by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDependency {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl ResolvedDependency {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            source: None,
            checksum: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }
}

/// The full set of pinned dependencies, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedDependencySet {
    dependencies: BTreeMap<String, ResolvedDependency>,
}

impl ResolvedDependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a dependency, replacing any earlier entry of the same name.
    pub fn insert(&mut self, dependency: ResolvedDependency) -> Option<ResolvedDependency> {
        self.dependencies.insert(dependency.name.clone(), dependency)
    }

    pub fn get(&self, name: &str) -> Option<&ResolvedDependency> {
        self.dependencies.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.dependencies.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedDependency> {
        self.dependencies.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.keys().map(String::as_str)
    }

    /// Name to version map
    pub fn versions(&self) -> BTreeMap<String, String> {
        self.dependencies
            .values()
            .map(|dep| (dep.name.clone(), dep.version.clone()))
            .collect()
    }

    /// Requirements that are missing from the set or not satisfied by the
    /// pinned version.
    pub fn unsatisfied<'a>(&self, requirements: &'a [Requirement]) -> Vec<&'a Requirement> {
        requirements
            .iter()
            .filter(|req| match self.get(req.name()) {
                Some(dep) => !req.is_satisfied_by(&dep.version),
                None => true,
            })
            .collect()
    }
}

impl FromIterator<ResolvedDependency> for ResolvedDependencySet {
    fn from_iter<I: IntoIterator<Item = ResolvedDependency>>(iter: I) -> Self {
        let mut set = Self::new();
        for dependency in iter {
            set.insert(dependency);
        }
        set
    }
}

/// Per-dependency sync result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Freshly installed (or replaced) and committed
    Installed,
    /// Already present at the resolved version; nothing written
    Unchanged,
    /// The provider failed; `transient` failures were retried first
    Failed { reason: String, transient: bool },
    /// The per-call timeout expired
    TimedOut,
    /// Not attempted or interrupted by cancellation
    Cancelled,
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Installed | SyncOutcome::Unchanged)
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Installed => write!(f, "installed"),
            SyncOutcome::Unchanged => write!(f, "unchanged"),
            SyncOutcome::Failed { reason, .. } => write!(f, "failed: {}", reason),
            SyncOutcome::TimedOut => write!(f, "timed out"),
            SyncOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Sync record for one dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySync {
    pub name: String,
    pub version: String,
    pub outcome: SyncOutcome,
    pub attempts: u32,
    pub duration: Duration,
}

/// Sync records for a whole resolved set, ordered by dependency name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    entries: BTreeMap<String, DependencySync>,
}

impl SyncReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: DependencySync) {
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&DependencySync> {
        self.entries.get(name)
    }

    pub fn entries(&self) -> impl Iterator<Item = &DependencySync> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_success(&self) -> bool {
        self.entries.values().all(|entry| entry.outcome.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &DependencySync> {
        self.entries
            .values()
            .filter(|entry| !entry.outcome.is_success())
    }

    pub fn count(&self, predicate: impl Fn(&SyncOutcome) -> bool) -> usize {
        self.entries
            .values()
            .filter(|entry| predicate(&entry.outcome))
            .count()
    }
}

/// Result of one generator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationReport {
    pub generator: String,
    pub output_directory: PathBuf,
    /// Artifact paths relative to the output directory, sorted
    pub artifacts: Vec<PathBuf>,
    /// Whether the committed output differs from what was there before
    pub changed: bool,
}

impl GenerationReport {
    pub fn new(generator: impl Into<String>, output_directory: impl Into<PathBuf>, mut artifacts: Vec<PathBuf>) -> Self {
        artifacts.sort();
        artifacts.dedup();
        Self {
            generator: generator.into(),
            output_directory: output_directory.into(),
            artifacts,
            changed: false,
        }
    }
}

/// Provider output handed to the generator, in a format both plugins
/// declared at registration.
#[derive(Debug, Clone)]
pub struct SyncData {
    pub provider: String,
    pub format: String,
    pub payload: ConfigData,
}

/// Pick the first format `consumed` lists that `produced` also offers.
///
/// A generator that consumes nothing pairs with any provider and gets no
/// sync data. Otherwise `Err` carries the formats the generator asked for.
pub fn negotiate_sync_format(produced: &[String], consumed: &[String]) -> Result<Option<String>, Vec<String>> {
    if consumed.is_empty() {
        return Ok(None);
    }
    consumed
        .iter()
        .find(|format| produced.contains(format))
        .map(|format| Some(format.clone()))
        .ok_or_else(|| consumed.to_vec())
}

/// Version metadata reported by a source-control plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: String,
    pub revision: Option<String>,
    pub dirty: bool,
}

impl VersionInfo {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            revision: None,
            dirty: false,
        }
    }
}

/// Outcome of [`identify`](crate::plugin_system::traits::SourceControlProvider::identify).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identification {
    Identified(VersionInfo),
    /// The working directory is not managed by this source-control system
    NotApplicable,
}

/// Where a plugin writes: a staging directory the engine later commits over
/// `destination`.
#[derive(Debug, Clone, Copy)]
pub struct StagingSlot<'a> {
    staging: &'a Path,
    destination: &'a Path,
}

impl<'a> StagingSlot<'a> {
    pub fn new(staging: &'a Path, destination: &'a Path) -> Self {
        Self { staging, destination }
    }

    /// The directory to write into; it exists and is empty.
    pub fn path(&self) -> &'a Path {
        self.staging
    }

    /// Where the staged content will live once committed.
    pub fn destination(&self) -> &'a Path {
        self.destination
    }
}
