//! The lifecycle driver.
//!
//! One [`Orchestrator::run`] takes a project from raw configuration sources to
//! installed dependencies and generated build integration:
//!
//! `Idle → Resolving → Registering → Syncing → Generating → Complete`
//!
//! Any failure moves the run to `Failed`. Plugins selected for the run are
//! released on every path out of it.
use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::model::{PluginKey, PluginRole, ProjectIdentity, ResolvedConfiguration};
use crate::config::resolver::ConfigResolver;
use crate::config::source::{self, ProjectSources};
use crate::kernel::error::{Error, Result};
use crate::lifecycle::error::LifecycleError;
use crate::lifecycle::result::{LifecycleResult, OperationOutcome, OperationRecord, RunMode};
use crate::lifecycle::state::{LifecycleState, StateMachine};
use crate::lifecycle::sync::SyncCoordinator;
use crate::plugin_system::dependency::{
    GenerationReport, Identification, ResolvedDependencySet, SyncOutcome, SyncReport,
};
use crate::plugin_system::error::{PluginError, PluginResult};
use crate::plugin_system::registry::{ActivePlugins, PluginRegistry};
use crate::storage::local::{StagedDirectory, list_files};
use crate::storage::lockfile::{LockEntry, LockFile};
use crate::storage::locks::PathLocks;

/// Mutable bookkeeping of a run in progress.
struct RunState {
    mode: RunMode,
    machine: StateMachine,
    records: Vec<OperationRecord>,
    project: Option<ProjectIdentity>,
    resolved: Option<ResolvedDependencySet>,
    sync_report: Option<SyncReport>,
    generation: Option<GenerationReport>,
    lock_updated: bool,
}

impl RunState {
    fn new(mode: RunMode) -> Self {
        Self {
            mode,
            machine: StateMachine::new(),
            records: Vec::new(),
            project: None,
            resolved: None,
            sync_report: None,
            generation: None,
            lock_updated: false,
        }
    }

    fn enter(&mut self, state: LifecycleState) -> Result<()> {
        self.machine.transition(state)?;
        Ok(())
    }

    fn record(
        &mut self,
        plugin: Option<(&str, PluginRole)>,
        operation: impl Into<String>,
        outcome: OperationOutcome,
        duration: Duration,
    ) {
        let record = OperationRecord {
            plugin: plugin.map(|(name, _)| name.to_string()),
            role: plugin.map(|(_, role)| role),
            operation: operation.into(),
            outcome,
            duration,
        };
        debug!("{}", record);
        self.records.push(record);
    }

    fn record_result<T, E: std::fmt::Display>(
        &mut self,
        plugin: Option<(&str, PluginRole)>,
        operation: &str,
        started: Instant,
        result: &std::result::Result<T, E>,
    ) {
        let outcome = match result {
            Ok(_) => OperationOutcome::Success,
            Err(err) => OperationOutcome::Failure(err.to_string()),
        };
        self.record(plugin, operation, outcome, started.elapsed());
    }
}

/// Drives one project through the lifecycle with the plugins of a registry.
pub struct Orchestrator<'a> {
    registry: &'a PluginRegistry,
    locks: &'a PathLocks,
    cancel: CancellationToken,
    home_dir: Option<PathBuf>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(registry: &'a PluginRegistry, locks: &'a PathLocks) -> Self {
        Self {
            registry,
            locks,
            cancel: CancellationToken::new(),
            home_dir: source::home_dir(),
        }
    }

    /// Use `token` to cancel the run from outside.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Home directory for the default install path.
    pub fn with_home_dir(mut self, home_dir: Option<PathBuf>) -> Self {
        self.home_dir = home_dir;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run the whole lifecycle. Never returns early: failures are reported in
    /// the result, which also carries every attempted operation.
    pub async fn run(&self, sources: &ProjectSources, mode: RunMode) -> LifecycleResult {
        info!("Starting {} for {}", mode, sources.root.display());
        let mut run = RunState::new(mode);
        let mut release_failures = Vec::new();

        let outcome = self.drive(sources, &mut run, &mut release_failures).await;
        let error = match outcome {
            Ok(()) => {
                info!("{} finished", mode);
                None
            }
            Err(err) => {
                error!("{} failed in state {}: {}", mode, run.machine.state(), err);
                run.machine.fail();
                Some(err)
            }
        };

        LifecycleResult {
            mode: run.mode,
            final_state: run.machine.state(),
            transitions: run.machine.into_history(),
            records: run.records,
            project: run.project,
            resolved: run.resolved,
            sync_report: run.sync_report,
            generation: run.generation,
            lock_updated: run.lock_updated,
            error,
            release_failures,
        }
    }

    async fn drive(
        &self,
        sources: &ProjectSources,
        run: &mut RunState,
        release_failures: &mut Vec<(PluginKey, PluginError)>,
    ) -> Result<()> {
        run.enter(LifecycleState::Resolving)?;
        let started = Instant::now();
        let resolved = ConfigResolver::new(&sources.root)
            .with_home_dir(self.home_dir.clone())
            .resolve_sources(sources);
        run.record_result(None, "resolve-configuration", started, &resolved);
        let config = resolved?;
        run.project = Some(config.project().clone());
        self.check_cancelled()?;

        run.enter(LifecycleState::Registering)?;
        let started = Instant::now();
        let selected = self.registry.select(&config);
        run.record_result(None, "select-plugins", started, &selected);
        let mut active = selected?;

        let outcome = self.execute(&config, &active, run).await;
        *release_failures = active.release();
        outcome
    }

    async fn execute(&self, config: &ResolvedConfiguration, active: &ActivePlugins, run: &mut RunState) -> Result<()> {
        run.enter(LifecycleState::Syncing)?;
        self.prepare_tooling(config, active, run).await?;

        let project = self.refresh_identity(config, active, run).await?;
        run.project = Some(project.clone());

        let provider = active
            .provider()
            .ok_or(LifecycleError::MissingRole(PluginRole::Provider))?;
        let provider_ref = Some((provider.name(), PluginRole::Provider));
        let install_root = config.options().plugin_install_dir(provider.name());
        let timeout = config.sync_policy().plugin_timeout();

        let started = Instant::now();
        let resolved = match run.mode {
            RunMode::Install => {
                self.call(
                    provider.name(),
                    PluginRole::Provider,
                    "resolve",
                    timeout,
                    provider.resolve(config.requirements()),
                )
                .await
            }
            RunMode::Update => {
                self.call(
                    provider.name(),
                    PluginRole::Provider,
                    "update",
                    timeout,
                    provider.update(config.requirements(), &install_root),
                )
                .await
            }
        };
        let operation = if run.mode == RunMode::Install { "resolve" } else { "update" };
        run.record_result(provider_ref, operation, started, &resolved);
        let resolved = resolved?;

        let unsatisfied = resolved.unsatisfied(config.requirements());
        if !unsatisfied.is_empty() {
            return Err(LifecycleError::UnsatisfiedResolution {
                plugin: provider.name().to_string(),
                requirements: unsatisfied.iter().map(|req| req.to_string()).collect(),
            }
            .into());
        }
        info!("Resolved {} dependencies", resolved.len());
        run.resolved = Some(resolved.clone());
        self.check_cancelled()?;

        let coordinator = SyncCoordinator::new(provider, &install_root, config.sync_policy(), self.locks, &self.cancel);
        let report = coordinator.sync_all(&resolved).await;
        for entry in report.entries() {
            let outcome = match &entry.outcome {
                SyncOutcome::Installed | SyncOutcome::Unchanged => OperationOutcome::Success,
                SyncOutcome::Cancelled => OperationOutcome::Skipped("cancelled".to_string()),
                other => OperationOutcome::Failure(other.to_string()),
            };
            run.record(provider_ref, format!("sync {}", entry.name), outcome, entry.duration);
        }
        let sync_result = self.check_sync(config, provider.name(), &report);
        run.sync_report = Some(report);
        sync_result?;

        let started = Instant::now();
        let locked = self.write_lock(config, &project, provider.name(), &resolved);
        run.record_result(None, "write-lock", started, &locked);
        run.lock_updated = locked?;
        self.check_cancelled()?;

        run.enter(LifecycleState::Generating)?;
        let generator = active
            .generator()
            .ok_or(LifecycleError::MissingRole(PluginRole::Generator))?;
        let output = config
            .options()
            .plugin_tool_dir(PluginRole::Generator, generator.name());

        let sync_data = match active.sync_format() {
            Some(format) => {
                let started = Instant::now();
                let data = self
                    .call(
                        provider.name(),
                        PluginRole::Provider,
                        "sync-data",
                        timeout,
                        provider.sync_data(format, &resolved, &install_root),
                    )
                    .await;
                run.record_result(provider_ref, "sync-data", started, &data);
                let data = data?;
                if data.format != format {
                    return Err(LifecycleError::PluginOperation {
                        plugin: provider.name().to_string(),
                        role: PluginRole::Provider,
                        operation: "sync-data".to_string(),
                        source: PluginError::Integrity(format!(
                            "asked for sync data as '{}', got '{}'",
                            format, data.format
                        )),
                    }
                    .into());
                }
                Some(data)
            }
            None => None,
        };

        let staged = StagedDirectory::new(&output)?;
        let started = Instant::now();
        let generated = self
            .call(
                generator.name(),
                PluginRole::Generator,
                "generate",
                timeout,
                generator.generate(&resolved, &install_root, sync_data.as_ref(), staged.slot()),
            )
            .await;
        run.record_result(Some((generator.name(), PluginRole::Generator)), "generate", started, &generated);
        let generated = generated.map_err(|err| match err {
            LifecycleError::PluginOperation { plugin, source, .. } => LifecycleError::Generation {
                plugin,
                reason: source.to_string(),
            },
            other => other,
        })?;

        let started = Instant::now();
        let mut report = GenerationReport::new(generator.name(), &output, list_files(staged.path())?);
        report.changed = staged.commit_if_changed()?;
        run.record(None, "commit-generated", OperationOutcome::Success, started.elapsed());
        if generated.artifacts != report.artifacts {
            debug!(
                "Generator reported {:?}, staged {:?}",
                generated.artifacts, report.artifacts
            );
        }
        info!(
            "Generated {} artifacts in {} ({})",
            report.artifacts.len(),
            output.display(),
            if report.changed { "changed" } else { "unchanged" }
        );
        run.generation = Some(report);

        run.enter(LifecycleState::Complete)?;
        Ok(())
    }

    /// Let the provider and generator fetch their external tooling, each into
    /// its cache directory.
    async fn prepare_tooling(&self, config: &ResolvedConfiguration, active: &ActivePlugins, run: &mut RunState) -> Result<()> {
        let timeout = config.sync_policy().plugin_timeout();
        if let Some(provider) = active.provider() {
            let directory = config.options().plugin_cache_dir(provider.name());
            let started = Instant::now();
            let prepared = self
                .call(
                    provider.name(),
                    PluginRole::Provider,
                    "prepare-tooling",
                    timeout,
                    provider.prepare_tooling(&directory),
                )
                .await;
            run.record_result(Some((provider.name(), PluginRole::Provider)), "prepare-tooling", started, &prepared);
            prepared?;
        }
        if let Some(generator) = active.generator() {
            let directory = config.options().plugin_cache_dir(generator.name());
            let started = Instant::now();
            let prepared = self
                .call(
                    generator.name(),
                    PluginRole::Generator,
                    "prepare-tooling",
                    timeout,
                    generator.prepare_tooling(&directory),
                )
                .await;
            run.record_result(Some((generator.name(), PluginRole::Generator)), "prepare-tooling", started, &prepared);
            prepared?;
        }
        self.check_cancelled()
    }

    /// Consult the source-control plugin and derive a dynamic version.
    async fn refresh_identity(
        &self,
        config: &ResolvedConfiguration,
        active: &ActivePlugins,
        run: &mut RunState,
    ) -> Result<ProjectIdentity> {
        let project = config.project();
        let Some(scm) = active.source_control() else {
            return Ok(project.clone());
        };
        let scm_ref = Some((scm.name(), PluginRole::SourceControl));
        let root = config.project_root();
        let timeout = config.sync_policy().plugin_timeout();

        let started = Instant::now();
        let repository = self
            .call(
                scm.name(),
                PluginRole::SourceControl,
                "is-repository",
                timeout,
                async { Ok::<_, PluginError>(scm.is_repository(root).await) },
            )
            .await;
        run.record_result(scm_ref, "is-repository", started, &repository);
        if !repository? {
            run.record(
                scm_ref,
                "identify",
                OperationOutcome::Skipped("not a repository".to_string()),
                Duration::ZERO,
            );
            if project.is_dynamic() {
                return Err(LifecycleError::UnresolvedVersion {
                    reason: format!("{} is not a {} repository", root.display(), scm.name()),
                }
                .into());
            }
            return Ok(project.clone());
        }

        let started = Instant::now();
        let identified = self
            .call(
                scm.name(),
                PluginRole::SourceControl,
                "identify",
                timeout,
                scm.identify(root),
            )
            .await;
        run.record_result(scm_ref, "identify", started, &identified);

        match (identified?, project.is_dynamic()) {
            (Identification::Identified(info), true) => {
                info!("Derived project version {} from {}", info.version, scm.name());
                project.with_version(info.version).map_err(|err| {
                    Error::from(LifecycleError::UnresolvedVersion {
                        reason: err.to_string(),
                    })
                })
            }
            (Identification::NotApplicable, true) => Err(LifecycleError::UnresolvedVersion {
                reason: format!("{} could not identify {}", scm.name(), root.display()),
            }
            .into()),
            (identification, false) => {
                if let Identification::Identified(info) = identification {
                    if project.version_str() != Some(info.version.as_str()) {
                        warn!(
                            "Declared version {} differs from {} version {}",
                            project.version(),
                            scm.name(),
                            info.version
                        );
                    }
                }
                Ok(project.clone())
            }
        }
    }

    fn check_sync(&self, config: &ResolvedConfiguration, provider: &str, report: &SyncReport) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(LifecycleError::Cancelled.into());
        }
        if let Some(timed_out) = report
            .entries()
            .find(|entry| entry.outcome == SyncOutcome::TimedOut)
        {
            return Err(LifecycleError::PluginTimeout {
                plugin: provider.to_string(),
                role: PluginRole::Provider,
                operation: format!("sync {}", timed_out.name),
                timeout: config.sync_policy().plugin_timeout(),
            }
            .into());
        }
        let failed: Vec<_> = report
            .entries()
            .filter(|entry| matches!(entry.outcome, SyncOutcome::Failed { .. }))
            .collect();
        if failed.is_empty() {
            return Ok(());
        }
        if config.sync_policy().fail_fast() {
            let first = failed[0];
            return Err(LifecycleError::SyncFailed {
                plugin: provider.to_string(),
                dependency: first.name.clone(),
                reason: first.outcome.to_string(),
            }
            .into());
        }
        Err(LifecycleError::PartialSync {
            failed: failed.iter().map(|entry| entry.name.clone()).collect(),
            total: report.len(),
        }
        .into())
    }

    /// Record the resolved set in the lock file. Returns whether it changed.
    fn write_lock(
        &self,
        config: &ResolvedConfiguration,
        project: &ProjectIdentity,
        provider: &str,
        resolved: &ResolvedDependencySet,
    ) -> Result<bool> {
        let path = config.options().lock_path();
        let mut lock = LockFile::load(path)?;
        let changed = lock.record(LockEntry {
            project: project.name().to_string(),
            project_version: project.version().to_string(),
            provider: provider.to_string(),
            dependencies: resolved.clone(),
        });
        if changed {
            lock.save(path)?;
            info!("Updated {}", path.display());
        } else {
            debug!("{} is up to date", path.display());
        }
        Ok(changed)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(LifecycleError::Cancelled.into());
        }
        Ok(())
    }

    /// Await a plugin call under the run's timeout and cancellation.
    async fn call<T>(
        &self,
        plugin: &str,
        role: PluginRole,
        operation: &str,
        timeout: Duration,
        future: impl Future<Output = PluginResult<T>>,
    ) -> std::result::Result<T, LifecycleError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(LifecycleError::Cancelled),
            result = tokio::time::timeout(timeout, future) => match result {
                Err(_) => Err(LifecycleError::PluginTimeout {
                    plugin: plugin.to_string(),
                    role,
                    operation: operation.to_string(),
                    timeout,
                }),
                Ok(Err(PluginError::Cancelled)) => Err(LifecycleError::Cancelled),
                Ok(Err(source)) => Err(LifecycleError::PluginOperation {
                    plugin: plugin.to_string(),
                    role,
                    operation: operation.to_string(),
                    source,
                }),
                Ok(Ok(value)) => Ok(value),
            },
        }
    }
}
