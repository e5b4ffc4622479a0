//! Console rendering of engine results.
use keel_core::config::model::{PluginRole, ResolvedConfiguration};
use keel_core::lifecycle::result::{LifecycleResult, OperationOutcome};
use keel_core::lifecycle::status::StatusReport;
use keel_core::plugin_system::registry::DiscoveredPlugins;

/// Print a finished run. Errors go to stderr.
pub fn print_result(result: &LifecycleResult) {
    let project = result
        .project()
        .map(|project| format!("{} {}", project.name(), project.version()))
        .unwrap_or_else(|| "<unresolved project>".to_string());
    println!("{} {}: {}", result.mode(), project, result.final_state());

    if let Some(report) = result.sync_report() {
        for entry in report.entries() {
            let attempts = if entry.attempts > 1 {
                format!(" after {} attempts", entry.attempts)
            } else {
                String::new()
            };
            println!("  {} {} {}{}", entry.name, entry.version, entry.outcome, attempts);
        }
    }
    if result.lock_updated() {
        println!("  lock file updated");
    }
    if let Some(generation) = result.generation() {
        println!(
            "  {} generated {} artifact(s) in {} ({})",
            generation.generator,
            generation.artifacts.len(),
            generation.output_directory.display(),
            if generation.changed { "changed" } else { "unchanged" }
        );
    }

    for record in result.records() {
        if let OperationOutcome::Skipped(reason) = &record.outcome {
            println!("  skipped {}: {}", record.operation, reason);
        }
    }
    for (key, err) in result.release_failures() {
        eprintln!("warning: releasing {} failed: {}", key, err);
    }
    if let Some(err) = result.error() {
        eprintln!("error: {}", err);
    }
}

pub fn print_status(report: &StatusReport) {
    println!("{} (provider '{}')", report.project, report.provider);
    println!("  lock file: {}", report.lock_path.display());
    println!("  install root: {}", report.install_root.display());
    if report.dependencies.is_empty() {
        println!("  no dependencies");
    }
    for dep in &report.dependencies {
        let required = dep.required.as_deref().unwrap_or("-");
        let locked = dep.locked.as_deref().unwrap_or("-");
        println!("  {:<24} required {:<20} locked {:<12} {}", dep.name, required, locked, dep.state);
    }
    if report.is_up_to_date() {
        println!("everything is up to date");
    } else {
        println!("run `keel resolve-and-sync` to bring dependencies up to date");
    }
}

pub fn print_plugins(plugins: &DiscoveredPlugins) {
    if plugins.is_empty() {
        println!("No plugins registered.");
        return;
    }
    for role in PluginRole::ALL {
        println!("{}:", role);
        for record in plugins.by_role(role) {
            match &record.description {
                Some(description) => println!(
                    "  - {} (API {}): {}",
                    record.key.name, record.api_range, description
                ),
                None => println!("  - {} (API {})", record.key.name, record.api_range),
            }
        }
    }
}

pub fn print_info(config: &ResolvedConfiguration) {
    let project = config.project();
    println!("project: {}", project.name());
    println!("version: {}", project.version());
    if let Some(description) = project.description() {
        println!("description: {}", description);
    }
    println!("root: {}", config.project_root().display());

    let options = config.options();
    println!("install path: {}", options.install_path().display());
    println!("cache path: {}", options.cache_path().display());
    println!("tool path: {}", options.tool_path().display());
    println!("build path: {}", options.build_path().display());

    let policy = config.sync_policy();
    println!(
        "sync: {} worker(s), fail-fast {}, {} retries, timeout {}s",
        policy.workers(),
        policy.fail_fast(),
        policy.retry().limit(),
        policy.plugin_timeout().as_secs()
    );

    println!("plugins:");
    for plugin in config.plugins() {
        let state = if plugin.is_enabled() { "enabled" } else { "disabled" };
        println!("  {} '{}' ({})", plugin.role(), plugin.name(), state);
    }
    println!("dependencies:");
    for requirement in config.requirements() {
        println!("  {}", requirement);
    }
}
