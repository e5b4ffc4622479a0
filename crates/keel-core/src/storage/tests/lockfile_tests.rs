use std::fs;

use tempfile::tempdir;

use crate::plugin_system::dependency::{ResolvedDependency, ResolvedDependencySet};
use crate::storage::error::StorageSystemError;
use crate::storage::lockfile::{LockEntry, LockFile};
use crate::storage::stamp::InstallStamp;

fn entry(version: &str) -> LockEntry {
    LockEntry {
        project: "demo".to_string(),
        project_version: "1.0.0".to_string(),
        provider: "fake".to_string(),
        dependencies: [ResolvedDependency::new("libfoo", version)].into_iter().collect::<ResolvedDependencySet>(),
    }
}

#[test]
fn test_missing_lock_file_is_empty() -> Result<(), StorageSystemError> {
    let temp_dir = tempdir().unwrap();
    let lock = LockFile::load(&temp_dir.path().join("keel.lock"))?;
    assert!(lock.is_empty());
    Ok(())
}

#[test]
fn test_record_reports_changes() {
    let mut lock = LockFile::default();
    assert!(lock.record(entry("1.2.0")));
    assert!(!lock.record(entry("1.2.0")));
    assert!(lock.record(entry("1.3.0")));
    assert_eq!(
        lock.entry("demo", "fake").unwrap().dependencies.get("libfoo").unwrap().version,
        "1.3.0"
    );
}

#[test]
fn test_save_and_load() -> Result<(), StorageSystemError> {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("keel.lock");

    let mut lock = LockFile::default();
    lock.record(entry("1.2.0"));
    lock.save(&path)?;

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("\"demo/fake\""));
    assert!(text.ends_with('\n'));

    let loaded = LockFile::load(&path)?;
    assert_eq!(loaded, lock);
    assert_eq!(loaded.entries_for("demo").count(), 1);
    Ok(())
}

#[test]
fn test_corrupt_lock_file_is_an_error() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("keel.lock");
    fs::write(&path, "not json").unwrap();
    assert!(matches!(
        LockFile::load(&path),
        Err(StorageSystemError::DeserializationError { .. })
    ));
}

#[test]
fn test_install_stamp() -> Result<(), StorageSystemError> {
    let temp_dir = tempdir().unwrap();
    let dependency = ResolvedDependency::new("libfoo", "1.2.0").with_checksum("abc");

    assert!(InstallStamp::read(temp_dir.path()).is_none());

    InstallStamp::new("fake", &dependency).write(temp_dir.path())?;
    let stamp = InstallStamp::read(temp_dir.path()).unwrap();
    assert!(stamp.matches("fake", &dependency));
    assert!(!stamp.matches("other", &dependency));
    assert!(!stamp.matches("fake", &ResolvedDependency::new("libfoo", "1.3.0")));
    Ok(())
}
