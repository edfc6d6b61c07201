//! Directory lock
//!
//! A `LOCK` file in the data directory, held with an exclusive advisory
//! lock for as long as the engine is open. The OS releases the lock when
//! the file handle closes, including on process exit.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{DbError, Result};

/// Name of the lock file inside the data directory
pub const LOCK_FILENAME: &str = "LOCK";

/// Exclusive ownership of a data directory
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
    _file: File,
}

impl DirLock {
    /// Acquire the lock without blocking.
    ///
    /// Fails with [`DbError::Locked`] if another handle, in this process or
    /// another, already holds it.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILENAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            return Err(DbError::Locked(dir.to_path_buf()));
        }

        Ok(Self { path, _file: file })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}
