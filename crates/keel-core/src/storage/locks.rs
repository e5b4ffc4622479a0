use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// In-process locks keyed by filesystem path.
///
/// Clones share the same lock table, so every run of one engine serializes
/// writes to the same install directory. Entries are dropped once no guard or
/// waiter holds them.
#[derive(Debug, Clone, Default)]
pub struct PathLocks {
    inner: Arc<StdMutex<HashMap<PathBuf, Weak<Mutex<()>>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `path`.
    pub async fn lock(&self, path: &Path) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut table = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            table.retain(|_, entry| entry.strong_count() > 0);
            match table.get(path).and_then(Weak::upgrade) {
                Some(mutex) => mutex,
                None => {
                    let mutex = Arc::new(Mutex::new(()));
                    table.insert(path.to_path_buf(), Arc::downgrade(&mutex));
                    mutex
                }
            }
        };
        mutex.lock_owned().await
    }

    /// Number of paths currently locked or waited on
    pub fn active(&self) -> usize {
        let table = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        table.values().filter(|entry| entry.strong_count() > 0).count()
    }
}
