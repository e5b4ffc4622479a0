use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::storage::locks::PathLocks;

#[tokio::test]
async fn test_same_path_is_exclusive() {
    let locks = PathLocks::new();
    let inside = Arc::new(AtomicUsize::new(0));
    let max_inside = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let locks = locks.clone();
        let inside = inside.clone();
        let max_inside = max_inside.clone();
        handles.push(tokio::spawn(async move {
            let _guard = locks.lock(Path::new("/install/libfoo")).await;
            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
            max_inside.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            inside.fetch_sub(1, Ordering::SeqCst);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(max_inside.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_different_paths_do_not_block() {
    let locks = PathLocks::new();
    let _first = locks.lock(Path::new("/install/a")).await;
    let second = tokio::time::timeout(Duration::from_secs(1), locks.lock(Path::new("/install/b"))).await;
    assert!(second.is_ok());
    assert_eq!(locks.active(), 2);
}

#[tokio::test]
async fn test_released_entries_are_dropped() {
    let locks = PathLocks::new();
    {
        let _guard = locks.lock(Path::new("/install/a")).await;
        assert_eq!(locks.active(), 1);
    }
    assert_eq!(locks.active(), 0);
}
