use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::debug;
use tempfile::{Builder, NamedTempFile, TempDir};

use crate::kernel::constants;
use crate::plugin_system::dependency::StagingSlot;
use crate::storage::error::StorageSystemError;

type Result<T> = std::result::Result<T, StorageSystemError>;

fn parent_of(path: &Path) -> Result<&Path> {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .ok_or_else(|| StorageSystemError::InvalidPath {
            path: path.to_path_buf(),
            reason: "path has no parent directory".to_string(),
        })
}

/// Write `contents` to `path` atomically: a temporary file in the same
/// directory is written first and then persisted over the target.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = parent_of(path)?;
    fs::create_dir_all(parent).map_err(|e| StorageSystemError::io(e, "create_dir_all", parent.to_path_buf()))?;

    let mut temp_file =
        NamedTempFile::new_in(parent).map_err(|e| StorageSystemError::io(e, "create_temp_file", parent.to_path_buf()))?;
    temp_file
        .write_all(contents)
        .map_err(|e| StorageSystemError::io(e, "write_to_temp_file", temp_file.path().to_path_buf()))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| StorageSystemError::io(e, "sync_temp_file", temp_file.path().to_path_buf()))?;
    temp_file
        .persist(path)
        .map_err(|e| StorageSystemError::io(e.error, "persist_temp_file", path.to_path_buf()))?;
    Ok(())
}

/// A directory being prepared next to its final location.
///
/// Content is written into a fresh staging directory in the destination's
/// parent. [`commit`](Self::commit) swaps it into place with renames; dropping
/// it without a commit removes everything that was staged.
#[derive(Debug)]
pub struct StagedDirectory {
    dir: TempDir,
    destination: PathBuf,
}

impl StagedDirectory {
    pub fn new(destination: &Path) -> Result<Self> {
        let parent = parent_of(destination)?;
        fs::create_dir_all(parent).map_err(|e| StorageSystemError::io(e, "create_dir_all", parent.to_path_buf()))?;
        let dir = Builder::new()
            .prefix(constants::STAGING_PREFIX)
            .tempdir_in(parent)
            .map_err(|e| StorageSystemError::io(e, "create_staging_dir", parent.to_path_buf()))?;
        Ok(Self {
            dir,
            destination: destination.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn slot(&self) -> StagingSlot<'_> {
        StagingSlot::new(self.dir.path(), &self.destination)
    }

    /// Replace the destination with the staged content.
    ///
    /// An existing destination is first moved aside; if the final rename
    /// fails it is moved back.
    pub fn commit(self) -> Result<()> {
        let parent = parent_of(&self.destination)?;
        let aside = if self.destination.exists() {
            let holder = Builder::new()
                .prefix(constants::STAGING_PREFIX)
                .tempdir_in(parent)
                .map_err(|e| StorageSystemError::io(e, "create_staging_dir", parent.to_path_buf()))?;
            let previous = holder.path().join("previous");
            fs::rename(&self.destination, &previous)
                .map_err(|e| StorageSystemError::io(e, "rename", self.destination.clone()))?;
            Some((holder, previous))
        } else {
            None
        };

        if let Err(err) = fs::rename(self.dir.path(), &self.destination) {
            if let Some((_, previous)) = &aside {
                if let Err(restore) = fs::rename(previous, &self.destination) {
                    log::error!(
                        "Failed to restore {} after an aborted commit: {}",
                        self.destination.display(),
                        restore
                    );
                }
            }
            return Err(StorageSystemError::io(err, "rename", self.dir.path().to_path_buf()));
        }

        // `aside` is dropped here, removing the previous content
        debug!("Committed staged directory to {}", self.destination.display());
        Ok(())
    }

    /// Commit only if the staged tree differs from the destination. Returns
    /// whether anything was replaced.
    pub fn commit_if_changed(self) -> Result<bool> {
        if self.destination.is_dir() && dirs_identical(self.path(), &self.destination)? {
            debug!("{} is unchanged; discarding staged copy", self.destination.display());
            return Ok(false);
        }
        self.commit()?;
        Ok(true)
    }
}

/// Relative paths of every file below `root`, sorted.
pub fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = BTreeSet::new();
    collect_files(root, Path::new(""), &mut files)?;
    Ok(files.into_iter().collect())
}

fn collect_files(root: &Path, relative: &Path, files: &mut BTreeSet<PathBuf>) -> Result<()> {
    let dir = root.join(relative);
    let entries = fs::read_dir(&dir).map_err(|e| StorageSystemError::io(e, "read_dir", dir.clone()))?;
    for entry in entries {
        let entry = entry.map_err(|e| StorageSystemError::io(e, "read_dir_entry", dir.clone()))?;
        let file_type = entry
            .file_type()
            .map_err(|e| StorageSystemError::io(e, "file_type", entry.path()))?;
        let child = relative.join(entry.file_name());
        if file_type.is_dir() {
            collect_files(root, &child, files)?;
        } else {
            files.insert(child);
        }
    }
    Ok(())
}

/// Whether two directory trees hold the same files with the same contents.
pub fn dirs_identical(left: &Path, right: &Path) -> Result<bool> {
    let left_files = list_files(left)?;
    if left_files != list_files(right)? {
        return Ok(false);
    }
    for relative in &left_files {
        let a = left.join(relative);
        let b = right.join(relative);
        let a_bytes = fs::read(&a).map_err(|e| StorageSystemError::io(e, "read", a.clone()))?;
        let b_bytes = fs::read(&b).map_err(|e| StorageSystemError::io(e, "read", b.clone()))?;
        if a_bytes != b_bytes {
            return Ok(false);
        }
    }
    Ok(true)
}
