//! On-disk layout
//!
//! ```text
//! <root>/
//! ├── <set>/
//! │   ├── b0        append-only block, objects back to back
//! │   ├── b1
//! │   └── ...
//! └── <set>/
//! ```
//!
//! Blocks carry no header and no index; every object is addressed by a
//! location descriptor kept in the metadata store.

use packstore_common::descriptor::block_file_name;
use packstore_common::{Result, SetName};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Maps sets and blocks to paths under the storage root
#[derive(Clone, Debug)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    /// Create a layout rooted at `root`, creating the root if missing
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Storage root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a set's blocks
    #[must_use]
    pub fn set_dir(&self, set: &SetName) -> PathBuf {
        self.root.join(set.as_str())
    }

    /// Absolute path of a block file
    #[must_use]
    pub fn block_path(&self, set: &SetName, block: u64) -> PathBuf {
        self.set_dir(set).join(block_file_name(block))
    }

    /// Remove a set's directory tree
    ///
    /// Returns false if the set had no directory. Symlinks inside the tree
    /// are removed, not followed.
    pub fn remove_set(&self, set: &SetName) -> Result<bool> {
        let dir = self.set_dir(set);
        match fs::symlink_metadata(&dir) {
            Ok(meta) if meta.is_dir() => {
                remove_tree(&dir)?;
                Ok(true)
            }
            Ok(_) => {
                fs::remove_file(&dir)?;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Depth-first removal: files, then nested directories, then `dir` itself
fn remove_tree(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            remove_tree(&path)?;
        } else {
            match fs::remove_file(&path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
    }
    match fs::remove_dir(dir) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
