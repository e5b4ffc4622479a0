//! Drift report comparing requirements, the lock file and install stamps.
//! No plugin is instantiated.
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use crate::config::model::{PluginRole, ResolvedConfiguration};
use crate::lifecycle::error::LifecycleError;
use crate::storage::lockfile::LockFile;
use crate::storage::stamp::InstallStamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyState {
    /// Locked, satisfying and installed
    UpToDate,
    /// Required but absent from the lock file
    NotLocked,
    /// The locked version no longer satisfies the requirement
    Stale,
    /// Locked but the install directory does not hold it
    NotInstalled,
    /// Locked but no longer required
    Extraneous,
}

impl fmt::Display for DependencyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DependencyState::UpToDate => "up to date",
            DependencyState::NotLocked => "not locked",
            DependencyState::Stale => "stale",
            DependencyState::NotInstalled => "not installed",
            DependencyState::Extraneous => "extraneous",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyStatus {
    pub name: String,
    /// The requirement as declared, if it still is
    pub required: Option<String>,
    pub locked: Option<String>,
    pub state: DependencyState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub project: String,
    pub provider: String,
    pub lock_path: PathBuf,
    pub install_root: PathBuf,
    pub dependencies: Vec<DependencyStatus>,
}

impl StatusReport {
    pub fn is_up_to_date(&self) -> bool {
        self.dependencies
            .iter()
            .all(|dep| dep.state == DependencyState::UpToDate)
    }

    pub fn get(&self, name: &str) -> Option<&DependencyStatus> {
        self.dependencies.iter().find(|dep| dep.name == name)
    }
}

/// Compare the resolved configuration with the lock file and the install root.
pub fn inspect(config: &ResolvedConfiguration, lock: &LockFile) -> Result<StatusReport, LifecycleError> {
    let provider = config
        .enabled(PluginRole::Provider)
        .first()
        .map(|plugin| plugin.name().to_string())
        .ok_or(LifecycleError::MissingRole(PluginRole::Provider))?;
    let project = config.project().name().to_string();
    let install_root = config.options().plugin_install_dir(&provider);
    let entry = lock.entry(&project, &provider);

    let mut dependencies = Vec::new();
    let mut required = BTreeSet::new();
    for requirement in config.requirements() {
        required.insert(requirement.name());
        let locked = entry.and_then(|entry| entry.dependencies.get(requirement.name()));
        let state = match locked {
            None => DependencyState::NotLocked,
            Some(dep) if !requirement.is_satisfied_by(&dep.version) => DependencyState::Stale,
            Some(dep) => {
                let installed = InstallStamp::read(&install_root.join(&dep.name))
                    .is_some_and(|stamp| stamp.matches(&provider, dep));
                if installed {
                    DependencyState::UpToDate
                } else {
                    DependencyState::NotInstalled
                }
            }
        };
        dependencies.push(DependencyStatus {
            name: requirement.name().to_string(),
            required: Some(requirement.to_string()),
            locked: locked.map(|dep| dep.version.clone()),
            state,
        });
    }

    if let Some(entry) = entry {
        for dep in entry.dependencies.iter() {
            if !required.contains(dep.name.as_str()) {
                dependencies.push(DependencyStatus {
                    name: dep.name.clone(),
                    required: None,
                    locked: Some(dep.version.clone()),
                    state: DependencyState::Extraneous,
                });
            }
        }
    }
    dependencies.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(StatusReport {
        project,
        provider,
        lock_path: config.options().lock_path().to_path_buf(),
        install_root,
        dependencies,
    })
}
