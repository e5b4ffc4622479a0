use std::fs;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{TestProject, staging_leftovers};
use crate::config::model::PluginRole;
use crate::kernel::constants;
use crate::kernel::error::Error;
use crate::lifecycle::error::LifecycleError;
use crate::lifecycle::result::{OperationOutcome, RunMode};
use crate::lifecycle::state::LifecycleState;
use crate::mock::{FAKE_TOOLING_FILE, GENERATED_FILE};
use crate::plugin_system::dependency::SyncOutcome;
use crate::plugin_system::error::PluginSystemError;
use crate::storage::lockfile::LockFile;

const DEMO: &str = r#"
[project]
name = "demo"
version = "1.0.0"

[keel]
dependencies = ["libfoo@1.2.0"]

[keel.provider.fake]
versions = { libfoo = ["1.1.0", "1.2.0"] }

[keel.generator.fake-gen]
"#;

fn three_deps(extra_keel: &str, provider: &str) -> String {
    format!(
        r#"
[project]
name = "demo"
version = "1.0.0"

[keel]
dependencies = ["liba", "libb", "libc"]
{extra_keel}

[keel.provider.fake]
versions = {{ liba = ["1.0.0"], libb = ["1.0.0"], libc = ["1.0.0"] }}
{provider}

[keel.generator.fake-gen]
"#
    )
}

fn lifecycle_error(error: Option<&Error>) -> &LifecycleError {
    match error {
        Some(Error::Lifecycle(err)) => err,
        other => panic!("expected a lifecycle error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_resolve_and_sync_end_to_end() {
    let project = TestProject::new(DEMO);

    let result = project.run(RunMode::Install).await;

    assert!(result.is_success(), "run failed: {:?}", result.error());
    assert_eq!(result.final_state(), LifecycleState::Complete);
    assert_eq!(result.exit_code(), constants::EXIT_SUCCESS);
    let states: Vec<_> = result.transitions().iter().map(|t| t.to).collect();
    assert_eq!(
        states,
        vec![
            LifecycleState::Resolving,
            LifecycleState::Registering,
            LifecycleState::Syncing,
            LifecycleState::Generating,
            LifecycleState::Complete,
        ]
    );

    // Highest satisfying version wins
    assert_eq!(result.resolved().unwrap().get("libfoo").unwrap().version, "1.2.0");
    let header = fs::read_to_string(project.install_root().join("libfoo/include/libfoo.h")).unwrap();
    assert!(header.contains("LIBFOO_VERSION \"1.2.0\""));
    assert_eq!(
        result.sync_report().unwrap().get("libfoo").unwrap().outcome,
        SyncOutcome::Installed
    );

    let lock = LockFile::load(&project.lock_path()).unwrap();
    let entry = lock.entry("demo", "fake").unwrap();
    assert_eq!(entry.project_version, "1.0.0");
    assert_eq!(entry.dependencies.get("libfoo").unwrap().version, "1.2.0");
    assert!(result.lock_updated());

    let generation = result.generation().unwrap();
    assert!(generation.changed);
    assert_eq!(generation.output_directory, project.output_dir());
    assert!(project.output_dir().join(GENERATED_FILE).is_file());

    assert!(staging_leftovers(&project.install_root()).is_empty());
    assert!(staging_leftovers(project.output_dir().parent().unwrap()).is_empty());
    assert!(result.release_failures().is_empty());

    assert_eq!(
        project.probe.events(),
        vec![
            "instantiate provider.fake",
            "instantiate generator.fake-gen",
            "prepare-tooling provider.fake",
            "prepare-tooling generator.fake-gen",
            "resolve",
            "sync libfoo",
            "sync-data",
            "generate",
            "shutdown generator.fake-gen",
            "shutdown provider.fake",
        ]
    );
}

#[tokio::test]
async fn test_operation_records_cover_every_step() {
    let project = TestProject::new(DEMO);
    let result = project.run(RunMode::Install).await;

    for operation in [
        "resolve-configuration",
        "select-plugins",
        "resolve",
        "sync libfoo",
        "write-lock",
        "sync-data",
        "generate",
        "commit-generated",
    ] {
        let records: Vec<_> = result.records_for(operation).collect();
        assert_eq!(records.len(), 1, "{operation}");
        assert_eq!(records[0].outcome, OperationOutcome::Success, "{operation}");
    }
    let resolve = result.records_for("resolve").next().unwrap();
    assert_eq!(resolve.plugin.as_deref(), Some("fake"));

    let tooling: Vec<_> = result
        .records_for("prepare-tooling")
        .map(|record| (record.plugin.as_deref(), record.role))
        .collect();
    assert_eq!(
        tooling,
        vec![
            (Some("fake"), Some(PluginRole::Provider)),
            (Some("fake-gen"), Some(PluginRole::Generator)),
        ]
    );
}

#[tokio::test]
async fn test_tooling_is_prepared_in_the_cache_directory() {
    let project = TestProject::new(DEMO);
    let marker = project
        .install_root()
        .parent()
        .unwrap()
        .join(".cache/fake")
        .join(FAKE_TOOLING_FILE);

    let result = project.run(RunMode::Install).await;

    assert!(result.is_success(), "{:?}", result.error());
    assert!(marker.is_file());
    let first_tooling = result.records().iter().position(|r| r.operation == "prepare-tooling").unwrap();
    let resolve = result.records().iter().position(|r| r.operation == "resolve").unwrap();
    assert!(first_tooling < resolve);
}

#[tokio::test]
async fn test_generator_receives_provider_sync_data() {
    let project = TestProject::new(DEMO);

    let result = project.run(RunMode::Install).await;

    assert!(result.is_success(), "{:?}", result.error());
    let sync_data = result.records_for("sync-data").next().unwrap();
    assert_eq!(sync_data.plugin.as_deref(), Some("fake"));
    let document: serde_json::Value =
        serde_json::from_slice(&fs::read(project.output_dir().join(GENERATED_FILE)).unwrap()).unwrap();
    let include = document["dependencies"][0]["include"].as_str().unwrap();
    assert_eq!(
        std::path::Path::new(include),
        project.install_root().join("libfoo/include")
    );
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let project = TestProject::new(DEMO);
    assert!(project.run(RunMode::Install).await.is_success());
    let generated = fs::read(project.output_dir().join(GENERATED_FILE)).unwrap();
    let lock = fs::read(project.lock_path()).unwrap();
    project.probe.clear();

    let result = project.run(RunMode::Install).await;

    assert!(result.is_success());
    assert_eq!(
        result.sync_report().unwrap().get("libfoo").unwrap().outcome,
        SyncOutcome::Unchanged
    );
    assert_eq!(project.probe.count("sync "), 0);
    assert!(!result.lock_updated());
    assert!(!result.generation().unwrap().changed);
    assert_eq!(fs::read(project.output_dir().join(GENERATED_FILE)).unwrap(), generated);
    assert_eq!(fs::read(project.lock_path()).unwrap(), lock);
}

#[tokio::test]
async fn test_update_picks_up_newer_versions() {
    let project = TestProject::new(
        r#"
[project]
name = "demo"
version = "1.0.0"

[keel]
dependencies = ["libfoo@^1.2"]

[keel.provider.fake]
versions = { libfoo = ["1.2.0"] }
updates = { libfoo = ["1.3.0"] }

[keel.generator.fake-gen]
"#,
    );
    let installed = project.run(RunMode::Install).await;
    assert_eq!(installed.resolved().unwrap().get("libfoo").unwrap().version, "1.2.0");

    let updated = project.run(RunMode::Update).await;

    assert!(updated.is_success(), "{:?}", updated.error());
    assert_eq!(updated.resolved().unwrap().get("libfoo").unwrap().version, "1.3.0");
    assert_eq!(project.probe.count("update"), 1);
    assert_eq!(updated.records_for("update").count(), 1);
    assert!(updated.lock_updated());
    assert!(updated.generation().unwrap().changed);
    let header = fs::read_to_string(project.install_root().join("libfoo/include/libfoo.h")).unwrap();
    assert!(header.contains("1.3.0"));
}

#[tokio::test]
async fn test_fail_fast_stops_remaining_syncs() {
    let project = TestProject::new(&three_deps("sync-workers = 1", r#"fail = ["libb"]"#));

    let result = project.run(RunMode::Install).await;

    assert_eq!(result.final_state(), LifecycleState::Failed);
    assert_eq!(result.exit_code(), constants::EXIT_PLUGIN_ERROR);
    match lifecycle_error(result.error()) {
        LifecycleError::SyncFailed { plugin, dependency, .. } => {
            assert_eq!(plugin, "fake");
            assert_eq!(dependency, "libb");
        }
        other => panic!("unexpected error {other:?}"),
    }

    let report = result.sync_report().unwrap();
    assert_eq!(report.get("liba").unwrap().outcome, SyncOutcome::Installed);
    assert!(matches!(report.get("libb").unwrap().outcome, SyncOutcome::Failed { .. }));
    assert_eq!(report.get("libc").unwrap().outcome, SyncOutcome::Cancelled);

    assert!(project.install_root().join("liba").is_dir());
    assert!(!project.install_root().join("libb").exists());
    assert!(!project.install_root().join("libc").exists());
    assert_eq!(project.probe.count("generate"), 0);
    assert!(!project.lock_path().exists());
    assert_eq!(project.probe.count("shutdown "), 2);
}

#[tokio::test]
async fn test_collect_all_reports_partial_failure() {
    let project = TestProject::new(&three_deps("fail-fast = false\nsync-workers = 2", r#"fail = ["libb"]"#));

    let result = project.run(RunMode::Install).await;

    assert_eq!(result.exit_code(), constants::EXIT_PARTIAL_FAILURE);
    match lifecycle_error(result.error()) {
        LifecycleError::PartialSync { failed, total } => {
            assert_eq!(failed, &vec!["libb".to_string()]);
            assert_eq!(*total, 3);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(project.install_root().join("liba").is_dir());
    assert!(project.install_root().join("libc").is_dir());
    assert!(!project.install_root().join("libb").exists());
    assert_eq!(project.probe.count("generate"), 0);
    assert!(staging_leftovers(&project.install_root()).is_empty());
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let project = TestProject::new(&three_deps(
        "retry-limit = 3\nretry-backoff-ms = 1",
        "transient-failures = { libb = 2 }",
    ));

    let result = project.run(RunMode::Install).await;

    assert!(result.is_success(), "{:?}", result.error());
    let libb = result.sync_report().unwrap().get("libb").unwrap().clone();
    assert_eq!(libb.outcome, SyncOutcome::Installed);
    assert_eq!(libb.attempts, 3);
    assert_eq!(project.probe.count("sync libb"), 3);
    assert!(staging_leftovers(&project.install_root()).is_empty());
}

#[tokio::test]
async fn test_retry_limit_exhausted() {
    let project = TestProject::new(&three_deps(
        "retry-limit = 1\nretry-backoff-ms = 1",
        "transient-failures = { libb = 5 }",
    ));

    let result = project.run(RunMode::Install).await;

    assert!(!result.is_success());
    let libb = result.sync_report().unwrap().get("libb").unwrap().clone();
    assert!(matches!(libb.outcome, SyncOutcome::Failed { transient: true, .. }));
    assert_eq!(libb.attempts, 2);
}

#[tokio::test]
async fn test_unknown_plugin_fails_before_any_instantiation() {
    let project = TestProject::new(
        r#"
[project]
name = "demo"
version = "1.0.0"

[keel.provider.nope]

[keel.generator.fake-gen]
"#,
    );

    let result = project.run(RunMode::Install).await;

    assert_eq!(result.final_state(), LifecycleState::Failed);
    assert_eq!(result.exit_code(), constants::EXIT_PLUGIN_ERROR);
    assert!(matches!(
        result.error(),
        Some(Error::PluginSystem(PluginSystemError::NotFound { name, .. })) if name == "nope"
    ));
    assert_eq!(project.probe.count("instantiate"), 0);
    let last = result.transitions().last().unwrap();
    assert_eq!(last.from, LifecycleState::Registering);
    assert_eq!(last.to, LifecycleState::Failed);
}

#[tokio::test]
async fn test_missing_manifest_is_a_configuration_error() {
    let project = TestProject::new(DEMO);
    fs::remove_file(project.root().join(constants::MANIFEST_FILE)).unwrap();

    let result = project.run(RunMode::Install).await;

    assert!(matches!(result.error(), Some(Error::Config(_))));
    assert_eq!(result.exit_code(), constants::EXIT_CONFIGURATION_ERROR);
    assert_eq!(result.final_state(), LifecycleState::Failed);
    assert!(result.project().is_none());
    assert!(project.probe.events().is_empty());
}

#[tokio::test]
async fn test_generator_failure_discards_output() {
    let project = TestProject::new(&DEMO.replace("[keel.generator.fake-gen]", "[keel.generator.fake-gen]\nfail = true"));

    let result = project.run(RunMode::Install).await;

    assert!(matches!(
        lifecycle_error(result.error()),
        LifecycleError::Generation { plugin, .. } if plugin == "fake-gen"
    ));
    assert_eq!(result.exit_code(), constants::EXIT_PLUGIN_ERROR);
    assert!(!project.output_dir().exists());
    assert!(staging_leftovers(project.output_dir().parent().unwrap()).is_empty());
    // Plugins are still released
    assert_eq!(project.probe.count("shutdown "), 2);
}

#[tokio::test]
async fn test_invalid_plugin_payload_fails_registration() {
    let project = TestProject::new(&DEMO.replace("[keel.generator.fake-gen]", "[keel.generator.fake-gen]\ncolour = \"red\""));

    let result = project.run(RunMode::Install).await;

    assert!(matches!(
        result.error(),
        Some(Error::PluginSystem(PluginSystemError::Load { name, .. })) if name == "fake-gen"
    ));
    // The provider built before the generator is released again
    assert_eq!(project.probe.count("instantiate provider.fake"), 1);
    assert_eq!(project.probe.count("shutdown provider.fake"), 1);
}

const DYNAMIC: &str = r#"
[project]
name = "demo"
dynamic = ["version"]

[keel]
dependencies = ["libfoo@1.2.0"]

[keel.scm.fake-scm]
version = "2.3.4"

[keel.provider.fake]

[keel.generator.fake-gen]
"#;

#[tokio::test]
async fn test_dynamic_version_comes_from_source_control() {
    let project = TestProject::new(DYNAMIC);

    let result = project.run(RunMode::Install).await;

    assert!(result.is_success(), "{:?}", result.error());
    assert_eq!(result.project().unwrap().version_str(), Some("2.3.4"));
    let lock = LockFile::load(&project.lock_path()).unwrap();
    assert_eq!(lock.entry("demo", "fake").unwrap().project_version, "2.3.4");
    assert_eq!(project.probe.count("identify"), 1);
    assert_eq!(project.probe.events().last().unwrap(), "shutdown scm.fake-scm");
    let repository = result.records_for("is-repository").next().unwrap();
    assert_eq!(repository.outcome, OperationOutcome::Success);
    assert_eq!(repository.role, Some(PluginRole::SourceControl));
}

#[tokio::test]
async fn test_dynamic_version_outside_repository() {
    let project = TestProject::new(&DYNAMIC.replace("version = \"2.3.4\"", "repository = false"));

    let result = project.run(RunMode::Install).await;

    assert!(matches!(
        lifecycle_error(result.error()),
        LifecycleError::UnresolvedVersion { .. }
    ));
    assert_eq!(result.exit_code(), constants::EXIT_CONFIGURATION_ERROR);
    let identify = result.records_for("identify").next().unwrap();
    assert!(matches!(identify.outcome, OperationOutcome::Skipped(_)));
    assert_eq!(result.records_for("is-repository").count(), 1);
    assert_eq!(project.probe.count("resolve"), 0);
    assert_eq!(project.probe.count("shutdown "), 3);
}

#[tokio::test]
async fn test_cancellation_leaves_no_partial_install() {
    let project = TestProject::new(&DEMO.replace(
        "versions = { libfoo = [\"1.1.0\", \"1.2.0\"] }",
        "versions = { libfoo = [\"1.2.0\"] }\ndelay-ms = 60000",
    ));
    let token = CancellationToken::new();
    let orchestrator = project.orchestrator().with_cancellation(token.clone());
    let sources = project.sources();

    let cancel = async {
        while project.probe.count("sync libfoo") == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();
    };
    let (result, ()) = tokio::join!(orchestrator.run(&sources, RunMode::Install), cancel);

    assert!(matches!(lifecycle_error(result.error()), LifecycleError::Cancelled));
    assert_eq!(result.final_state(), LifecycleState::Failed);
    assert_eq!(
        result.sync_report().unwrap().get("libfoo").unwrap().outcome,
        SyncOutcome::Cancelled
    );
    assert!(!project.install_root().join("libfoo").exists());
    assert!(staging_leftovers(&project.install_root()).is_empty());
    assert!(!project.lock_path().exists());
    assert_eq!(project.probe.count("generate"), 0);
    assert_eq!(project.probe.count("shutdown "), 2);
}

#[tokio::test(start_paused = true)]
async fn test_sync_timeout_aborts_the_run() {
    let project = TestProject::new(&DEMO.replace(
        "[keel]",
        "[keel]\nplugin-timeout-secs = 1",
    ).replace(
        "versions = { libfoo = [\"1.1.0\", \"1.2.0\"] }",
        "versions = { libfoo = [\"1.2.0\"] }\ndelay-ms = 5000",
    ));

    let result = project.run(RunMode::Install).await;

    match lifecycle_error(result.error()) {
        LifecycleError::PluginTimeout { plugin, operation, timeout, .. } => {
            assert_eq!(plugin, "fake");
            assert_eq!(operation, "sync libfoo");
            assert_eq!(*timeout, Duration::from_secs(1));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(result.exit_code(), constants::EXIT_PLUGIN_ERROR);
    assert!(!project.install_root().join("libfoo").exists());
}

#[tokio::test(start_paused = true)]
async fn test_repository_check_is_bounded_by_the_plugin_timeout() {
    let project = TestProject::new(
        &DYNAMIC
            .replace("[keel]", "[keel]\nplugin-timeout-secs = 1")
            .replace("version = \"2.3.4\"", "version = \"2.3.4\"\nhang = true"),
    );

    let result = tokio::time::timeout(Duration::from_secs(3600), project.run(RunMode::Install))
        .await
        .expect("run must not outlive the plugin timeout");

    match lifecycle_error(result.error()) {
        LifecycleError::PluginTimeout { plugin, role, operation, .. } => {
            assert_eq!(plugin, "fake-scm");
            assert_eq!(*role, PluginRole::SourceControl);
            assert_eq!(operation, "is-repository");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(result.exit_code(), constants::EXIT_PLUGIN_ERROR);
    let repository = result.records_for("is-repository").next().unwrap();
    assert!(matches!(repository.outcome, OperationOutcome::Failure(_)));
    assert_eq!(project.probe.count("identify"), 0);
    assert_eq!(project.probe.count("shutdown "), 3);
}

#[tokio::test]
async fn test_cancellation_interrupts_the_repository_check() {
    let project = TestProject::new(&DYNAMIC.replace("version = \"2.3.4\"", "version = \"2.3.4\"\nhang = true"));
    let token = CancellationToken::new();
    let orchestrator = project.orchestrator().with_cancellation(token.clone());
    let sources = project.sources();

    let cancel = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    };
    let (result, ()) = tokio::join!(orchestrator.run(&sources, RunMode::Install), cancel);

    assert!(matches!(lifecycle_error(result.error()), LifecycleError::Cancelled));
    assert_eq!(project.probe.count("resolve"), 0);
    assert_eq!(project.probe.count("shutdown "), 3);
}
