use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use keel_core::kernel::constants;
use keel_core::mock::{MockProbe, register_mock_plugins};
use keel_core::{Engine, PluginCatalog, RunMode, find_project_root};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod cli;

#[derive(Parser, Debug)]
#[command(author, version, about = "Dependency orchestration for C and C++ projects", long_about = None)]
struct CliArgs {
    /// Project directory (default: nearest directory holding keel.toml)
    #[arg(long, global = true, value_name = "DIR")]
    project: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve declared dependencies, sync them and run the generator
    #[command(name = "resolve-and-sync", visible_alias = "sync")]
    ResolveAndSync,
    /// Re-resolve against the latest available versions, then sync
    Update,
    /// Compare requirements, the lock file and installed dependencies
    Status,
    /// List registered plugins
    Plugins,
    /// Show the resolved project configuration
    Info,
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    // keel-core logs through the `log` facade
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("warning: cannot forward log records: {}", e);
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::registry().with(filter).with(
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false),
    );
    if let Err(e) = subscriber.try_init() {
        eprintln!("warning: cannot install log subscriber: {}", e);
    }
}

fn build_catalog() -> Result<PluginCatalog, keel_core::plugin_system::error::PluginSystemError> {
    let mut catalog = PluginCatalog::new();
    register_mock_plugins(&mut catalog, &MockProbe::new())?;
    keel_scm_git::register(&mut catalog)?;
    Ok(catalog)
}

/// The project root from `--project`, else the nearest manifest above the
/// current directory. Prints the error and returns the exit code on failure.
fn project_root(explicit: Option<PathBuf>) -> Result<PathBuf, u8> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    let located = std::env::current_dir()
        .map_err(|e| format!("cannot read the current directory: {}", e))
        .and_then(|cwd| {
            find_project_root(&cwd).ok_or_else(|| {
                format!(
                    "no {} found in {} or any parent directory",
                    constants::MANIFEST_FILE,
                    cwd.display()
                )
            })
        });
    located.map_err(|message| {
        eprintln!("error: {}", message);
        constants::EXIT_CONFIGURATION_ERROR
    })
}

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_interrupt(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling the run");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    init_logging(args.verbose);

    let catalog = match build_catalog() {
        Ok(catalog) => catalog,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(constants::EXIT_PLUGIN_ERROR);
        }
    };
    let engine = Engine::new(catalog);

    ExitCode::from(execute(&engine, args.command, args.project).await)
}

async fn execute(engine: &Engine, command: Command, project: Option<PathBuf>) -> u8 {
    let mode = match command {
        Command::Plugins => {
            cli::print_plugins(&engine.plugins());
            return constants::EXIT_SUCCESS;
        }
        Command::ResolveAndSync => RunMode::Install,
        Command::Update => RunMode::Update,
        Command::Status => {
            let root = match project_root(project) {
                Ok(root) => root,
                Err(code) => return code,
            };
            // Drift is reported, not treated as a failure
            return match engine.status(&root) {
                Ok(report) => {
                    cli::print_status(&report);
                    constants::EXIT_SUCCESS
                }
                Err(e) => {
                    eprintln!("error: {}", e);
                    e.exit_code()
                }
            };
        }
        Command::Info => {
            let root = match project_root(project) {
                Ok(root) => root,
                Err(code) => return code,
            };
            return match engine.resolve(&root) {
                Ok(config) => {
                    cli::print_info(&config);
                    constants::EXIT_SUCCESS
                }
                Err(e) => {
                    eprintln!("error: {}", e);
                    e.exit_code()
                }
            };
        }
    };

    let root = match project_root(project) {
        Ok(root) => root,
        Err(code) => return code,
    };
    let cancel = CancellationToken::new();
    cancel_on_interrupt(&cancel);
    let result = engine.run(&root, mode, cancel).await;
    cli::print_result(&result);
    result.exit_code()
}
