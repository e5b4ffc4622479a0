//! The worker pool behind the Syncing state.
//!
//! Every dependency of the resolved set is installed into its own staging
//! directory below the provider's install root and committed with a rename
//! once the provider reports success. Up to `sync-workers` dependencies are in
//! flight at once. Transient failures are retried with exponential backoff;
//! with fail-fast enabled the first failure cancels every other worker, and a
//! timeout always does.
use std::path::Path;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::model::SyncPolicy;
use crate::plugin_system::dependency::{
    DependencySync, ResolvedDependency, ResolvedDependencySet, SyncOutcome, SyncReport, validate_dependency_name,
};
use crate::plugin_system::error::PluginError;
use crate::plugin_system::traits::DependencyProvider;
use crate::storage::local::StagedDirectory;
use crate::storage::locks::PathLocks;
use crate::storage::stamp::InstallStamp;

enum Attempt {
    Done,
    Failed(PluginError),
    TimedOut,
    Cancelled,
}

/// Fans a resolved set out over the provider's `sync` hook.
pub struct SyncCoordinator<'a> {
    provider: &'a dyn DependencyProvider,
    install_root: &'a Path,
    policy: &'a SyncPolicy,
    locks: &'a PathLocks,
    cancel: &'a CancellationToken,
}

impl<'a> SyncCoordinator<'a> {
    pub fn new(
        provider: &'a dyn DependencyProvider,
        install_root: &'a Path,
        policy: &'a SyncPolicy,
        locks: &'a PathLocks,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            provider,
            install_root,
            policy,
            locks,
            cancel,
        }
    }

    /// Sync every dependency. The report holds one entry per dependency;
    /// those never started because the run was aborted are `Cancelled`.
    pub async fn sync_all(&self, dependencies: &ResolvedDependencySet) -> SyncReport {
        let abort = self.cancel.child_token();
        info!(
            "Syncing {} dependencies with provider '{}' ({} workers)",
            dependencies.len(),
            self.provider.name(),
            self.policy.workers()
        );

        let entries: Vec<DependencySync> = stream::iter(dependencies.iter())
            .map(|dependency| {
                let abort = &abort;
                async move {
                    let entry = self.sync_one(dependency, abort).await;
                    let fatal = match &entry.outcome {
                        SyncOutcome::TimedOut => true,
                        SyncOutcome::Failed { .. } => self.policy.fail_fast(),
                        _ => false,
                    };
                    if fatal && !abort.is_cancelled() {
                        warn!("Aborting remaining syncs after '{}' {}", entry.name, entry.outcome);
                        abort.cancel();
                    }
                    entry
                }
            })
            .buffer_unordered(self.policy.workers())
            .collect()
            .await;

        let mut report = SyncReport::new();
        for entry in entries {
            report.record(entry);
        }
        report
    }

    async fn sync_one(&self, dependency: &ResolvedDependency, abort: &CancellationToken) -> DependencySync {
        let started = Instant::now();
        let finish = |outcome: SyncOutcome, attempts: u32| DependencySync {
            name: dependency.name.clone(),
            version: dependency.version.clone(),
            outcome,
            attempts,
            duration: started.elapsed(),
        };

        if abort.is_cancelled() {
            return finish(SyncOutcome::Cancelled, 0);
        }
        if let Err(reason) = validate_dependency_name(&dependency.name) {
            return finish(
                SyncOutcome::Failed {
                    reason,
                    transient: false,
                },
                0,
            );
        }

        let destination = self.install_root.join(&dependency.name);
        let _guard = tokio::select! {
            biased;
            _ = abort.cancelled() => return finish(SyncOutcome::Cancelled, 0),
            guard = self.locks.lock(&destination) => guard,
        };

        let provider_name = self.provider.name();
        if InstallStamp::read(&destination).is_some_and(|stamp| stamp.matches(provider_name, dependency)) {
            debug!("{}@{} is already installed", dependency.name, dependency.version);
            return finish(SyncOutcome::Unchanged, 0);
        }

        let retry = self.policy.retry();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let staged = match StagedDirectory::new(&destination) {
                Ok(staged) => staged,
                Err(err) => {
                    return finish(
                        SyncOutcome::Failed {
                            reason: err.to_string(),
                            transient: false,
                        },
                        attempts,
                    );
                }
            };

            debug!("Syncing {}@{} (attempt {})", dependency.name, dependency.version, attempts);
            let call = self.provider.sync(dependency, staged.slot());
            let attempt = tokio::select! {
                biased;
                _ = abort.cancelled() => Attempt::Cancelled,
                result = tokio::time::timeout(self.policy.plugin_timeout(), call) => match result {
                    Err(_) => Attempt::TimedOut,
                    Ok(Ok(())) => Attempt::Done,
                    Ok(Err(err)) => Attempt::Failed(err),
                },
            };

            match attempt {
                Attempt::Done => {
                    let committed = InstallStamp::new(provider_name, dependency)
                        .write(staged.path())
                        .and_then(|()| staged.commit());
                    return match committed {
                        Ok(()) => {
                            info!("Installed {}@{}", dependency.name, dependency.version);
                            finish(SyncOutcome::Installed, attempts)
                        }
                        Err(err) => finish(
                            SyncOutcome::Failed {
                                reason: err.to_string(),
                                transient: false,
                            },
                            attempts,
                        ),
                    };
                }
                Attempt::Failed(PluginError::Cancelled) | Attempt::Cancelled => {
                    return finish(SyncOutcome::Cancelled, attempts);
                }
                Attempt::TimedOut => {
                    warn!(
                        "Sync of {} timed out after {:?}",
                        dependency.name,
                        self.policy.plugin_timeout()
                    );
                    return finish(SyncOutcome::TimedOut, attempts);
                }
                Attempt::Failed(err) if err.is_transient() && attempts <= retry.limit() => {
                    // Drop the failed attempt's staging before waiting
                    drop(staged);
                    let delay = retry.delay_for(attempts);
                    warn!(
                        "Sync of {} failed ({}); retrying in {:?} ({} of {})",
                        dependency.name,
                        err,
                        delay,
                        attempts,
                        retry.limit()
                    );
                    tokio::select! {
                        biased;
                        _ = abort.cancelled() => return finish(SyncOutcome::Cancelled, attempts),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Attempt::Failed(err) => {
                    warn!("Sync of {} failed: {}", dependency.name, err);
                    return finish(
                        SyncOutcome::Failed {
                            reason: err.to_string(),
                            transient: err.is_transient(),
                        },
                        attempts,
                    );
                }
            }
        }
    }
}
