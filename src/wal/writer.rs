//! WAL Writer
//!
//! Handles appending entries to the WAL file.
//!
//! An append either lands completely or leaves the file as it was: on a
//! failed write or sync the file is cut back to its previous length. If
//! even that fails the writer refuses all further appends, since the log
//! may now end in an entry the caller was told had failed.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::WalSyncStrategy;
use crate::error::{DbError, Result};

use super::{Operation, WalEntry};

/// Writes entries to the WAL file
pub struct WalWriter {
    path: PathBuf,
    file: File,
    /// Length of the file up to the last good entry
    len: u64,
    /// LSN of the last appended entry
    current_lsn: u64,
    sync_strategy: WalSyncStrategy,
    /// Entries appended since the last fsync
    unsynced: usize,
    /// Set when a failed append could not be undone
    poisoned: Option<String>,
}

impl WalWriter {
    /// Open or create a WAL file for appending.
    ///
    /// `last_lsn` is the highest LSN already used; new entries continue
    /// from there.
    pub fn open(path: &Path, sync_strategy: WalSyncStrategy, last_lsn: u64) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            len,
            current_lsn: last_lsn,
            sync_strategy,
            unsynced: 0,
            poisoned: None,
        })
    }

    /// Append one batch of operations as a single entry.
    ///
    /// The entry always reaches the OS before this returns; it is fsynced
    /// when `sync` is set or the sync strategy calls for it. On error the
    /// entry is not in the log.
    pub fn append(&mut self, ops: &[Operation], sync: bool) -> Result<u64> {
        if let Some(reason) = &self.poisoned {
            return Err(DbError::WalWrite(format!("WAL is unusable: {}", reason)));
        }

        let lsn = self.current_lsn + 1;
        let frame = WalEntry::encode(lsn, ops)?;

        let due = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.unsynced + 1 >= count,
        };

        let written = self.file.write_all(&frame).and_then(|_| {
            if sync || due {
                self.file.sync_data()
            } else {
                Ok(())
            }
        });

        if let Err(e) = written {
            self.rollback(lsn, &e);
            return Err(DbError::WalWrite(format!("append of LSN {} failed: {}", lsn, e)));
        }

        self.len += frame.len() as u64;
        self.current_lsn = lsn;
        self.unsynced = if sync || due { 0 } else { self.unsynced + 1 };
        Ok(lsn)
    }

    /// Cut the file back to the last good entry, or poison the writer
    fn rollback(&mut self, lsn: u64, cause: &std::io::Error) {
        match self.file.set_len(self.len).and_then(|_| self.file.sync_data()) {
            Ok(()) => {
                tracing::warn!(path = %self.path.display(), lsn, error = %cause, "WAL append failed, entry discarded");
            }
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    lsn,
                    error = %cause,
                    rollback_error = %e,
                    "WAL append failed and could not be undone"
                );
                self.poisoned = Some(format!("append of LSN {} could not be undone: {}", lsn, e));
            }
        }
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Drop all entries (their effects are durable in SSTables).
    ///
    /// LSNs keep increasing across truncations.
    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.len = 0;
        self.unsynced = 0;
        tracing::debug!(path = %self.path.display(), lsn = self.current_lsn, "WAL truncated");
        Ok(())
    }

    /// Get the current LSN
    pub fn current_lsn(&self) -> u64 {
        self.current_lsn
    }

    /// True once an append failed in a way that could not be undone
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// Path of the WAL file
    pub fn path(&self) -> &Path {
        &self.path
    }
}
