//! Engine Module
//!
//! The core storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Coordinate WAL, MemTable, and Storage
//! - Apply write batches atomically
//! - Hand out consistent snapshots to readers
//! - Trigger flushes when MemTable is full, compaction when tables pile up
//! - Manage crash recovery and the directory lock on startup
//!
//! ## Directory layout
//! ```text
//! <data_dir>/
//! ├── LOCK          exclusive lock while open
//! ├── wal.log       batches not yet flushed
//! └── sstables/
//!     └── sstable_000001.sst ...
//! ```

mod lock;
mod snapshot;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::error::{DbError, Result};
use crate::memtable::{MemTable, MemTableEntry};
use crate::storage::{BlockCache, StorageManager};
use crate::wal::{Operation, WalRecovery, WalWriter};

pub use lock::{DirLock, LOCK_FILENAME};
pub use snapshot::{EngineIterator, Snapshot};

/// WAL file name inside the data directory
pub const WAL_FILENAME: &str = "wal.log";

/// SSTable directory name inside the data directory
pub const SSTABLE_DIR: &str = "sstables";

/// On-disk state of a persistent engine
struct Disk {
    /// Held for the engine's lifetime
    _lock: DirLock,

    /// Write-ahead log (appends serialized by `write_lock`)
    wal: Mutex<WalWriter>,

    /// Persistent storage manager (internal RwLock on the table list)
    storage: StorageManager,
}

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (write/flush/compact): Serialized by `write_lock`
///   - Only ONE write operation at a time
///   - Order: write_lock → WAL → memtable → storage
///
/// - **Reads** (get/snapshot): Never take `write_lock`
///   - A read clones the memtable `Arc` and the table list under the
///     memtable read lock, then works on that snapshot lock-free
///   - Writers update the memtable copy-on-write (`Arc::make_mut`), so a
///     snapshot's memtable never changes under it
///   - Flushed tables are installed under the memtable write lock, so a
///     snapshot sees a flushed batch either in the memtable or in a table,
///     never in both or neither
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// `None` in memory-only mode
    disk: Option<Disk>,

    /// In-memory table for recent writes
    mem: RwLock<Arc<MemTable>>,

    /// Value cache shared by all tables
    cache: Option<Arc<BlockCache>>,

    /// Serializes write operations
    write_lock: Mutex<()>,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Create data directory and take its lock
    /// 2. Load existing SSTables
    /// 3. Recover from WAL, flush recovered batches to an SSTable
    /// 4. Ready to serve requests
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;

        if config.memory_only {
            tracing::debug!("Opening memory-only engine");
            return Ok(Self {
                config: config.clone(),
                disk: None,
                mem: RwLock::new(Arc::new(MemTable::new())),
                cache: None,
                write_lock: Mutex::new(()),
            });
        }

        let data_dir = &config.data_dir;

        // Step 1: Directory and lock
        fs::create_dir_all(data_dir).map_err(|e| DbError::Open {
            path: data_dir.clone(),
            reason: e.to_string(),
        })?;
        let lock = DirLock::acquire(data_dir)?;

        // Step 2: Storage manager (loads existing SSTables)
        let cache = match config.block_cache_size() {
            0 => None,
            size => Some(Arc::new(BlockCache::new(size))),
        };
        let storage = StorageManager::open(
            &data_dir.join(SSTABLE_DIR),
            cache.clone(),
            config.paranoid_checks,
        )?;

        // Step 3: WAL recovery
        let wal_path = data_dir.join(WAL_FILENAME);
        let mut memtable = MemTable::new();
        let mut last_lsn = 0;

        if wal_path.exists() {
            let (entries, recovery) = WalRecovery::recover(&wal_path, config.paranoid_checks)?;

            if recovery.entries_corrupted > 0 || recovery.was_truncated {
                tracing::warn!(
                    path = %wal_path.display(),
                    recovered = recovery.entries_recovered,
                    corrupted = recovery.entries_corrupted,
                    "WAL recovery dropped a damaged tail"
                );
            } else if recovery.entries_recovered > 0 {
                tracing::info!(
                    recovered = recovery.entries_recovered,
                    last_lsn = recovery.last_lsn,
                    "Replaying WAL"
                );
            }

            for entry in &entries {
                memtable.apply(&entry.ops);
            }
            last_lsn = recovery.last_lsn;
        }

        let mut wal = WalWriter::open(&wal_path, config.wal_sync_strategy, last_lsn)?;

        // Make recovered data durable in an SSTable, then start a fresh log
        if !memtable.is_empty() {
            tracing::debug!(entries = memtable.entry_count(), "Flushing recovered entries");
            let table = storage.flush(&memtable)?;
            storage.install(table)?;
            memtable.clear();
        }
        wal.truncate()?;

        let engine = Self {
            config: config.clone(),
            disk: Some(Disk {
                _lock: lock,
                wal: Mutex::new(wal),
                storage,
            }),
            mem: RwLock::new(Arc::new(memtable)),
            cache,
            write_lock: Mutex::new(()),
        };

        if let Some(disk) = &engine.disk {
            engine.maybe_compact(disk)?;
        }

        tracing::debug!(
            path = %data_dir.display(),
            sstables = engine.sstable_count(),
            write_buffer = config.write_buffer_size(),
            "Engine opened"
        );
        Ok(engine)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a value by key
    ///
    /// Search order:
    /// 1. MemTable (most recent writes)
    /// 2. SSTables (newest to oldest)
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        // The table list is read under the memtable lock so a concurrent
        // flush is seen either entirely or not at all.
        let tables = {
            let mem = self.mem.read();
            match mem.get(key) {
                Some(MemTableEntry::Value(v)) => return Ok(Some(v.to_vec())),
                Some(MemTableEntry::Tombstone) => return Ok(None),
                None => {}
            }
            match &self.disk {
                Some(disk) => disk.storage.tables(),
                None => return Ok(None),
            }
        };
        StorageManager::get_from(&tables, key)
    }

    /// Consistent point-in-time view
    pub fn snapshot(&self) -> Snapshot {
        let mem = self.mem.read();
        let tables = match &self.disk {
            Some(disk) => disk.storage.tables(),
            None => Vec::new(),
        };
        Snapshot::new(Arc::clone(&*mem), tables)
    }

    /// Iterator over a fresh snapshot
    pub fn iter(&self) -> EngineIterator {
        self.snapshot().iter()
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Put a key-value pair
    pub fn put(&self, key: &[u8], value: &[u8], sync: bool) -> Result<()> {
        self.write(
            &[Operation::Put {
                key: key.to_vec(),
                value: value.to_vec(),
            }],
            sync,
        )
    }

    /// Delete a key
    pub fn delete(&self, key: &[u8], sync: bool) -> Result<()> {
        self.write(&[Operation::Delete { key: key.to_vec() }], sync)
    }

    /// Apply operations atomically, in order
    ///
    /// Steps:
    /// 1. Acquire write lock
    /// 2. Append the whole batch as one WAL entry (durability)
    /// 3. Apply to MemTable
    /// 4. Check if flush needed
    ///
    /// If the WAL append fails nothing is applied. Once applied the batch
    /// is committed: a failed flush afterwards is logged and retried on a
    /// later write, and the data stays in the memtable and the WAL.
    pub fn write(&self, ops: &[Operation], sync: bool) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let _write_guard = self.write_lock.lock();

        if let Some(disk) = &self.disk {
            disk.wal.lock().append(ops, sync)?;
        }

        let full = {
            let mut mem = self.mem.write();
            let table = Arc::make_mut(&mut *mem);
            table.apply(ops);
            table.should_flush(self.config.write_buffer_size())
        };

        if let Some(disk) = &self.disk {
            if full {
                if let Err(e) = self.flush_locked(disk) {
                    tracing::warn!(
                        error = %e,
                        memtable_bytes = self.memtable_size(),
                        "Flush after write failed; keeping data in memtable"
                    );
                }
            }
        }

        Ok(())
    }

    /// Flush memtable to disk
    ///
    /// Forces a flush regardless of memtable size. No-op in memory-only mode.
    pub fn flush(&self) -> Result<()> {
        let Some(disk) = &self.disk else {
            return Ok(());
        };
        let _write_guard = self.write_lock.lock();
        self.flush_locked(disk)
    }

    /// Internal flush implementation (called with write lock held)
    fn flush_locked(&self, disk: &Disk) -> Result<()> {
        let mem = Arc::clone(&*self.mem.read());
        if mem.is_empty() {
            return Ok(());
        }

        // Step 1: Write the SSTable (readers continue on the old memtable)
        let table = disk.storage.flush(&mem)?;

        // Step 2: Swap table in and memtable out in one step for readers
        {
            let mut guard = self.mem.write();
            disk.storage.install(table)?;
            *guard = Arc::new(MemTable::new());
        }

        // Step 3: Truncate WAL (entries are now durable in SSTable)
        disk.wal.lock().truncate()?;

        tracing::debug!(
            entries = mem.entry_count(),
            bytes = mem.size(),
            sstables = disk.storage.sstable_count(),
            "Flushed memtable"
        );

        self.maybe_compact(disk)
    }

    fn maybe_compact(&self, disk: &Disk) -> Result<()> {
        let count = disk.storage.sstable_count();
        if count > 1 && count >= self.config.max_sstables {
            disk.storage.compact()?;
        }
        Ok(())
    }

    /// Flush, then merge every table if any holds keys in `[start, end)`.
    ///
    /// `None` bounds are open. Tombstones and overwritten values are
    /// dropped. No-op in memory-only mode.
    pub fn compact_range(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        let Some(disk) = &self.disk else {
            return Ok(());
        };
        let _write_guard = self.write_lock.lock();
        self.flush_locked(disk)?;

        let touched = match (start, end) {
            (Some(s), Some(e)) => disk.storage.overlaps(s, e),
            _ => disk.storage.sstable_count() > 0,
        };
        if touched && disk.storage.sstable_count() > 1 {
            disk.storage.compact()?;
        }
        Ok(())
    }

    /// Approximate on-disk bytes used by keys in `[start, end)`.
    ///
    /// Data still in the memtable is not counted.
    pub fn approximate_size(&self, start: &[u8], end: &[u8]) -> u64 {
        match &self.disk {
            Some(disk) => disk.storage.approximate_size(start, end),
            None => 0,
        }
    }

    /// Close the engine gracefully
    ///
    /// Flushes any pending data and releases the directory lock
    pub fn close(self) -> Result<()> {
        if let Some(disk) = &self.disk {
            let _write_guard = self.write_lock.lock();
            self.flush_locked(disk)?;
            disk.wal.lock().sync()?;
        }
        tracing::debug!(path = %self.config.data_dir.display(), "Engine closed");
        Ok(())
    }

    /// Remove all engine files under `path`.
    ///
    /// Fails with [`DbError::Locked`] if the directory is open elsewhere.
    /// Files the engine does not own are left alone; the directory itself
    /// is removed only if nothing else remains in it.
    pub fn destroy(path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }

        {
            let _lock = DirLock::acquire(path)?;

            remove_if_exists(&path.join(WAL_FILENAME))?;
            let sstables = path.join(SSTABLE_DIR);
            if sstables.exists() {
                fs::remove_dir_all(&sstables)?;
            }
        }

        remove_if_exists(&path.join(LOCK_FILENAME))?;
        // Only succeeds when empty
        let _ = fs::remove_dir(path);

        tracing::info!(path = %path.display(), "Destroyed engine data");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the storage directory path (where SSTables are stored)
    pub fn storage_dir(&self) -> Option<PathBuf> {
        self.disk.as_ref().map(|d| d.storage.data_dir().to_path_buf())
    }

    /// True when nothing is persisted
    pub fn is_memory_only(&self) -> bool {
        self.disk.is_none()
    }

    /// True while a snapshot shares the current memtable, so the next
    /// write has to copy it first
    pub fn memtable_shared(&self) -> bool {
        Arc::strong_count(&*self.mem.read()) > 1
    }

    /// Get the current memtable size
    pub fn memtable_size(&self) -> usize {
        self.mem.read().size()
    }

    /// Get the memtable entry count
    pub fn memtable_entry_count(&self) -> usize {
        self.mem.read().entry_count()
    }

    /// Get the number of SSTables
    pub fn sstable_count(&self) -> usize {
        self.disk.as_ref().map_or(0, |d| d.storage.sstable_count())
    }

    /// Approximate memory held by the memtable and the block cache
    pub fn memory_usage(&self) -> usize {
        self.memtable_size() + self.cache.as_ref().map_or(0, |c| c.usage())
    }

    /// The block cache, if enabled
    pub fn cache(&self) -> Option<&Arc<BlockCache>> {
        self.cache.as_ref()
    }

    /// LSN of the last logged batch (0 in memory-only mode)
    pub fn last_lsn(&self) -> u64 {
        self.disk.as_ref().map_or(0, |d| d.wal.lock().current_lsn())
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
