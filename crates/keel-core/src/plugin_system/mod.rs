//! # Keel Core Plugin System
//!
//! Backends are plugged into the engine through three role traits:
//! [`SourceControlProvider`], [`DependencyProvider`] and [`BuildGenerator`].
//!
//! ## Key Submodules and Responsibilities:
//!
//! - **[`catalog`]**: The explicit registration table ([`PluginCatalog`]) that
//!   maps a role and a name onto a factory.
//! - **[`registry`]**: Discovers records from the catalog and instantiates the
//!   plugins a resolved configuration enables ([`PluginRegistry::select`]),
//!   handing back an [`ActivePlugins`] set that releases them on every exit path.
//! - **[`traits`]**: The role contracts and the base [`Plugin`] trait.
//! - **[`dependency`]**: Requirements, resolved dependency sets and the reports
//!   plugins return.
//! - **[`error`]**: [`PluginError`] for plugin operations and
//!   [`PluginSystemError`] for registry failures.
//! - **[`version`]**: Engine API versions and compatibility ranges.
pub mod catalog;
pub mod dependency;
pub mod error;
pub mod registry;
pub mod traits;
pub mod version;

pub use catalog::{PluginCatalog, PluginFactory, Registration};
pub use dependency::{
    GenerationReport, Identification, Requirement, ResolvedDependency, ResolvedDependencySet, StagingSlot,
    SyncData, SyncOutcome, SyncReport, VersionConstraint, VersionInfo, negotiate_sync_format,
};
pub use error::{PluginError, PluginResult, PluginSystemError};
pub use registry::{ActivePlugins, DiscoveredPlugins, PluginRecord, PluginRegistry};
pub use traits::{BuildGenerator, DependencyProvider, Plugin, PluginContext, SourceControlProvider};
pub use version::{ApiVersion, VersionRange};
