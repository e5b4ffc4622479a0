//! # Keel Core Kernel
//!
//! The `kernel` module binds the subsystems of `keel-core` together.
//!
//! ## Key Responsibilities & Components:
//!
//! - **Engine**: The [`Engine`](bootstrap::Engine) from the `bootstrap`
//!   submodule owns the plugin registry and the path locks, and exposes the
//!   logical operations (`resolve-and-sync`, `update`, `status`).
//! - **Core Constants**: File names, defaults, limits and exit codes live in
//!   the `constants` submodule.
//! - **Error Handling**: The aggregate [`Error`](error::Error) type and the
//!   `Result` alias in the `error` submodule.
pub mod bootstrap;
pub mod constants;
pub mod error;

pub use bootstrap::{Engine, find_project_root};
pub use error::{Error, Result};

#[cfg(test)]
mod tests;
