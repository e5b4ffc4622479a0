use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use crate::config::model::{RetryPolicy, SyncPolicy};
use crate::lifecycle::sync::SyncCoordinator;
use crate::plugin_system::dependency::{
    Requirement, ResolvedDependency, ResolvedDependencySet, StagingSlot, SyncOutcome,
};
use crate::plugin_system::error::PluginResult;
use crate::plugin_system::traits::{DependencyProvider, Plugin};
use crate::storage::locks::PathLocks;
use crate::storage::stamp::InstallStamp;

/// Counts concurrent syncs and writes one marker file.
#[derive(Default)]
struct CountingProvider {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl Plugin for CountingProvider {
    fn name(&self) -> &str {
        "counting"
    }

    fn version(&self) -> &str {
        "0.0.1"
    }
}

#[async_trait]
impl DependencyProvider for CountingProvider {
    async fn resolve(&self, _requirements: &[Requirement]) -> PluginResult<ResolvedDependencySet> {
        Ok(ResolvedDependencySet::new())
    }

    async fn sync(&self, dependency: &ResolvedDependency, slot: StagingSlot<'_>) -> PluginResult<()> {
        self.calls.lock().unwrap().push(dependency.name.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio::fs::write(slot.path().join("marker"), dependency.version.as_bytes()).await?;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update(&self, _requirements: &[Requirement], _install_root: &Path) -> PluginResult<ResolvedDependencySet> {
        Ok(ResolvedDependencySet::new())
    }
}

fn policy(workers: usize) -> SyncPolicy {
    SyncPolicy::new(true, workers, RetryPolicy::new(0, Duration::from_millis(1)), Duration::from_secs(30)).unwrap()
}

fn deps(names: &[&str], version: &str) -> ResolvedDependencySet {
    names
        .iter()
        .map(|name| ResolvedDependency::new(*name, version))
        .collect()
}

#[tokio::test]
async fn test_worker_limit_bounds_concurrency() {
    let temp_dir = tempdir().unwrap();
    let provider = CountingProvider::default();
    let policy = policy(2);
    let locks = PathLocks::new();
    let cancel = CancellationToken::new();
    let coordinator = SyncCoordinator::new(&provider, temp_dir.path(), &policy, &locks, &cancel);

    let report = coordinator
        .sync_all(&deps(&["a", "b", "c", "d", "e", "f"], "1.0.0"))
        .await;

    assert!(report.is_success());
    assert_eq!(report.len(), 6);
    assert_eq!(provider.peak.load(Ordering::SeqCst), 2);
    for name in ["a", "b", "c", "d", "e", "f"] {
        assert_eq!(std::fs::read(temp_dir.path().join(name).join("marker")).unwrap(), b"1.0.0");
    }
}

#[tokio::test]
async fn test_installed_dependency_is_stamped_and_skipped() {
    let temp_dir = tempdir().unwrap();
    let provider = CountingProvider::default();
    let policy = policy(4);
    let locks = PathLocks::new();
    let cancel = CancellationToken::new();
    let coordinator = SyncCoordinator::new(&provider, temp_dir.path(), &policy, &locks, &cancel);
    let set = deps(&["libfoo"], "1.2.0");

    let first = coordinator.sync_all(&set).await;
    let second = coordinator.sync_all(&set).await;

    assert_eq!(first.get("libfoo").unwrap().outcome, SyncOutcome::Installed);
    assert_eq!(second.get("libfoo").unwrap().outcome, SyncOutcome::Unchanged);
    assert_eq!(second.get("libfoo").unwrap().attempts, 0);
    assert_eq!(provider.calls.lock().unwrap().len(), 1);
    let stamp = InstallStamp::read(&temp_dir.path().join("libfoo")).unwrap();
    assert_eq!(stamp.version, "1.2.0");
    assert_eq!(stamp.provider, "counting");
}

#[tokio::test]
async fn test_new_version_replaces_install() {
    let temp_dir = tempdir().unwrap();
    let provider = CountingProvider::default();
    let policy = policy(1);
    let locks = PathLocks::new();
    let cancel = CancellationToken::new();
    let coordinator = SyncCoordinator::new(&provider, temp_dir.path(), &policy, &locks, &cancel);

    coordinator.sync_all(&deps(&["libfoo"], "1.2.0")).await;
    let report = coordinator.sync_all(&deps(&["libfoo"], "1.3.0")).await;

    assert_eq!(report.get("libfoo").unwrap().outcome, SyncOutcome::Installed);
    assert_eq!(std::fs::read(temp_dir.path().join("libfoo/marker")).unwrap(), b"1.3.0");
}

#[tokio::test]
async fn test_unsafe_dependency_name_is_never_synced() {
    let temp_dir = tempdir().unwrap();
    let provider = CountingProvider::default();
    let policy = SyncPolicy::new(false, 1, RetryPolicy::default(), Duration::from_secs(30)).unwrap();
    let locks = PathLocks::new();
    let cancel = CancellationToken::new();
    let coordinator = SyncCoordinator::new(&provider, temp_dir.path(), &policy, &locks, &cancel);

    let report = coordinator.sync_all(&deps(&["../escape", "ok"], "1.0.0")).await;

    let escape = report.get("../escape").unwrap();
    assert!(matches!(escape.outcome, SyncOutcome::Failed { transient: false, .. }));
    assert_eq!(escape.attempts, 0);
    assert_eq!(report.get("ok").unwrap().outcome, SyncOutcome::Installed);
    assert_eq!(*provider.calls.lock().unwrap(), vec!["ok".to_string()]);
}

#[tokio::test]
async fn test_cancelled_run_starts_nothing() {
    let temp_dir = tempdir().unwrap();
    let provider = CountingProvider::default();
    let policy = policy(2);
    let locks = PathLocks::new();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let coordinator = SyncCoordinator::new(&provider, temp_dir.path(), &policy, &locks, &cancel);

    let report = coordinator.sync_all(&deps(&["a", "b"], "1.0.0")).await;

    assert_eq!(report.count(|outcome| *outcome == SyncOutcome::Cancelled), 2);
    assert!(provider.calls.lock().unwrap().is_empty());
    assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
}
