//! # Keel Core Storage
//!
//! Filesystem primitives the engine relies on: atomic file writes, staged
//! directory commits, path-scoped locks, install stamps and the lock artifact.
pub mod error;
pub mod local;
pub mod lockfile;
pub mod locks;
pub mod stamp;

pub use error::StorageSystemError;
pub use local::{StagedDirectory, dirs_identical, list_files, write_atomic};
pub use lockfile::{LockEntry, LockFile};
pub use locks::PathLocks;
pub use stamp::InstallStamp;

#[cfg(test)]
mod tests;
