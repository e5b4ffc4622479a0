//! # Keel Core Lifecycle
//!
//! Drives a project through resolve, sync and generation with whichever
//! plugins its configuration selects.
//!
//! - **[`orchestrator`]**: The state machine driver ([`Orchestrator`]).
//! - **[`sync`]**: The bounded worker pool used while syncing.
//! - **[`state`]**: Lifecycle states and allowed transitions.
//! - **[`result`]**: [`LifecycleResult`] and per-operation records.
//! - **[`status`]**: Drift inspection without running any plugin.
pub mod error;
pub mod orchestrator;
pub mod result;
pub mod state;
pub mod status;
pub mod sync;

pub use error::LifecycleError;
pub use orchestrator::Orchestrator;
pub use result::{LifecycleResult, OperationOutcome, OperationRecord, RunMode};
pub use state::{LifecycleState, StateMachine, Transition};
pub use status::{DependencyState, DependencyStatus, StatusReport, inspect};
pub use sync::SyncCoordinator;

#[cfg(test)]
mod tests;
