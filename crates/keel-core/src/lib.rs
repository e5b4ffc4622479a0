//! # keel-core
//!
//! The engine behind `keel`: layered configuration resolution, a registry
//! for source-control, provider and generator plugins, and the lifecycle that
//! resolves, syncs and generates a project's native dependencies.
pub mod config;
pub mod kernel;
pub mod lifecycle;
pub mod plugin_system;
pub mod storage;

#[cfg(any(test, feature = "mock-plugins"))]
pub mod mock;

pub use config::{ConfigResolver, ProjectSources, ResolvedConfiguration};
pub use kernel::{Engine, Error, Result, find_project_root};
pub use lifecycle::{LifecycleResult, LifecycleState, RunMode, StatusReport};
pub use plugin_system::{
    BuildGenerator, DependencyProvider, Plugin, PluginCatalog, PluginContext, PluginError, Registration,
    SourceControlProvider,
};
