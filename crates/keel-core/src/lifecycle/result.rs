use std::fmt;
use std::time::Duration;

use crate::config::model::{PluginKey, PluginRole, ProjectIdentity};
use crate::kernel::constants;
use crate::kernel::error::Error;
use crate::lifecycle::state::{LifecycleState, Transition};
use crate::plugin_system::dependency::{GenerationReport, ResolvedDependencySet, SyncReport};
use crate::plugin_system::error::PluginError;

/// Which logical operation a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Resolve the declared requirements and sync them
    Install,
    /// Re-resolve against the latest upstream state, then sync
    Update,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Install => write!(f, "resolve-and-sync"),
            RunMode::Update => write!(f, "update"),
        }
    }
}

/// Outcome of one attempted operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// Operation executed successfully
    Success,
    /// Operation failed with error
    Failure(String),
    /// Operation was skipped
    Skipped(String),
}

impl fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationOutcome::Success => write!(f, "Success"),
            OperationOutcome::Failure(msg) => write!(f, "Failure: {}", msg),
            OperationOutcome::Skipped(reason) => write!(f, "Skipped: {}", reason),
        }
    }
}

/// One attempted engine or plugin operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRecord {
    /// `None` for the engine's own steps
    pub plugin: Option<String>,
    pub role: Option<PluginRole>,
    pub operation: String,
    pub outcome: OperationOutcome,
    pub duration: Duration,
}

impl OperationRecord {
    pub fn is_success(&self) -> bool {
        self.outcome == OperationOutcome::Success
    }
}

impl fmt::Display for OperationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.role, &self.plugin) {
            (Some(role), Some(plugin)) => write!(f, "[{} '{}'] {}: {}", role, plugin, self.operation, self.outcome),
            _ => write!(f, "[engine] {}: {}", self.operation, self.outcome),
        }
    }
}

/// Everything a finished run produced. Built by the orchestrator and never
/// changed afterwards.
#[derive(Debug)]
pub struct LifecycleResult {
    pub(crate) mode: RunMode,
    pub(crate) final_state: LifecycleState,
    pub(crate) transitions: Vec<Transition>,
    pub(crate) records: Vec<OperationRecord>,
    pub(crate) project: Option<ProjectIdentity>,
    pub(crate) resolved: Option<ResolvedDependencySet>,
    pub(crate) sync_report: Option<SyncReport>,
    pub(crate) generation: Option<GenerationReport>,
    pub(crate) lock_updated: bool,
    pub(crate) error: Option<Error>,
    pub(crate) release_failures: Vec<(PluginKey, PluginError)>,
}

impl LifecycleResult {
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn is_success(&self) -> bool {
        self.final_state == LifecycleState::Complete && self.error.is_none()
    }

    pub fn final_state(&self) -> LifecycleState {
        self.final_state
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Every attempted operation in the order it finished
    pub fn records(&self) -> &[OperationRecord] {
        &self.records
    }

    /// Records of one named operation
    pub fn records_for<'a>(&'a self, operation: &'a str) -> impl Iterator<Item = &'a OperationRecord> + 'a {
        self.records
            .iter()
            .filter(move |record| record.operation == operation)
    }

    /// Project identity, with the dynamic version filled in when it was derived
    pub fn project(&self) -> Option<&ProjectIdentity> {
        self.project.as_ref()
    }

    pub fn resolved(&self) -> Option<&ResolvedDependencySet> {
        self.resolved.as_ref()
    }

    pub fn sync_report(&self) -> Option<&SyncReport> {
        self.sync_report.as_ref()
    }

    pub fn generation(&self) -> Option<&GenerationReport> {
        self.generation.as_ref()
    }

    pub fn lock_updated(&self) -> bool {
        self.lock_updated
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Plugins whose shutdown reported a failure
    pub fn release_failures(&self) -> &[(PluginKey, PluginError)] {
        &self.release_failures
    }

    pub fn exit_code(&self) -> u8 {
        match &self.error {
            Some(err) => err.exit_code(),
            None if self.is_success() => constants::EXIT_SUCCESS,
            None => constants::EXIT_PLUGIN_ERROR,
        }
    }
}
