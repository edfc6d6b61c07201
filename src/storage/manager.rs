//! Storage Manager
//!
//! Manages multiple SSTables and coordinates reads/writes.
//!
//! ## Responsibilities
//! - Discover existing SSTables on startup via the manifest
//! - Search SSTables newest → oldest for reads
//! - Create new SSTables from MemTable flushes
//! - Merge all SSTables into one (compaction)
//! - Track SSTable lifecycle

use std::fs;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{DbError, Result};
use crate::memtable::{MemTable, MemTableEntry};

use super::cache::BlockCache;
use super::manifest::Manifest;
use super::{SSTableBuilder, SSTableReader};

/// Shared handle to an open table
pub type TableRef = Arc<SSTableReader>;

/// Manages the storage layer
///
/// ## Concurrency:
/// - `sstables`: Protected by RwLock (many concurrent readers, exclusive writer)
/// - `next_sstable_id`: Atomic counter (lock-free)
/// - Readers are `Arc`-shared so snapshots keep retired tables alive
/// - Installing and replacing tables is serialized by the engine's write lock
pub struct StorageManager {
    /// Directory where SSTables are stored
    data_dir: PathBuf,

    /// Open SSTable readers, ordered newest → oldest
    sstables: RwLock<Vec<TableRef>>,

    /// Next ID for creating new SSTables (atomic, lock-free)
    next_sstable_id: AtomicU64,

    /// Value cache shared by all readers
    cache: Option<Arc<BlockCache>>,

    /// Verify table checksums when opening
    paranoid_checks: bool,
}

impl StorageManager {
    /// Open or create storage in the given directory
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Remove leftovers of interrupted table builds
    /// 3. Load the manifest (or adopt every table found, for a new one)
    /// 4. Delete tables the manifest does not list
    /// 5. Open readers for the listed tables, in manifest order
    pub fn open(path: &Path, cache: Option<Arc<BlockCache>>, paranoid_checks: bool) -> Result<Self> {
        fs::create_dir_all(path)?;

        let mut on_disk: Vec<u64> = Vec::new();

        for entry in fs::read_dir(path)? {
            let file_path = entry?.path();
            if !file_path.is_file() {
                continue;
            }
            if file_path.extension().map_or(false, |ext| ext == "tmp") {
                tracing::debug!(path = %file_path.display(), "Removing unfinished file");
                fs::remove_file(&file_path)?;
                continue;
            }
            if let Some(id) = Self::parse_sstable_id(&file_path) {
                on_disk.push(id);
            }
        }

        let manifest = Manifest::load(path)?;
        let live = match &manifest {
            Some(m) => m.tables.clone(),
            None => {
                let mut ids = on_disk.clone();
                ids.sort_unstable_by(|a, b| b.cmp(a));
                ids
            }
        };

        for id in on_disk.iter().filter(|id| !live.contains(id)) {
            let orphan = Self::sstable_path_with_dir(path, *id);
            tracing::debug!(path = %orphan.display(), "Removing SSTable not in manifest");
            fs::remove_file(&orphan)?;
        }

        let mut sstables = Vec::with_capacity(live.len());
        for id in &live {
            let sstable_path = Self::sstable_path_with_dir(path, *id);
            if !sstable_path.exists() {
                return Err(DbError::Corruption(format!(
                    "Manifest lists missing SSTable {}",
                    sstable_path.display()
                )));
            }
            let reader = SSTableReader::open_with(&sstable_path, *id, cache.clone(), paranoid_checks)?;
            sstables.push(Arc::new(reader));
        }

        if manifest.is_none() {
            Manifest::new(live.clone()).save(path)?;
        }

        // Next ID = max + 1, or 1 if no SSTables exist
        let next_id = on_disk.iter().chain(&live).max().map_or(1, |&id| id + 1);

        Ok(Self {
            data_dir: path.to_path_buf(),
            sstables: RwLock::new(sstables),
            next_sstable_id: AtomicU64::new(next_id),
            cache,
            paranoid_checks,
        })
    }

    /// Current tables, newest first
    pub fn tables(&self) -> Vec<TableRef> {
        self.sstables.read().clone()
    }

    /// Get a value by key from the current tables
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Self::get_from(&self.tables(), key)
    }

    /// Get a value by key, searching `tables` newest → oldest
    ///
    /// Returns:
    /// - `Ok(Some(value))` — key found with value
    /// - `Ok(None)` — key not found, or found tombstone (deleted)
    pub fn get_from(tables: &[TableRef], key: &[u8]) -> Result<Option<Vec<u8>>> {
        for reader in tables {
            // Skip SSTable if key is outside its range (O(1) check)
            if !reader.might_contain(key) {
                continue;
            }

            match reader.get(key) {
                Ok(Some(value)) => return Ok(Some(value)), // Found!
                Ok(None) => return Ok(None),               // Tombstone = deleted
                Err(DbError::KeyNotFound) => continue,     // Not in this SSTable
                Err(e) => return Err(e),                   // Real error
            }
        }

        Ok(None)
    }

    /// Smallest key across `tables` satisfying the lower bound
    pub fn next_key_from<'a>(tables: &'a [TableRef], lower: Bound<&[u8]>) -> Option<&'a [u8]> {
        tables
            .iter()
            .filter_map(|t| t.first_key_from(lower))
            .min()
    }

    /// Write a MemTable to a new SSTable (not yet installed)
    pub fn flush(&self, memtable: &MemTable) -> Result<TableRef> {
        if memtable.is_empty() {
            return Err(DbError::Storage("Cannot flush empty MemTable".to_string()));
        }

        self.write_table(memtable.iter().map(|(key, entry)| match entry {
            MemTableEntry::Value(v) => (key, Some(v.as_ref())),
            MemTableEntry::Tombstone => (key, None),
        }))
    }

    /// Build a table from sorted entries (`None` value = tombstone).
    ///
    /// The file is written under a temporary name and renamed into place
    /// once complete, so a crash never leaves a half-written table behind.
    pub fn write_table<'a, I>(&self, entries: I) -> Result<TableRef>
    where
        I: IntoIterator<Item = (&'a [u8], Option<&'a [u8]>)>,
    {
        let id = self.next_sstable_id.fetch_add(1, Ordering::SeqCst);
        let path = self.sstable_path(id);
        let tmp_path = path.with_extension("sst.tmp");

        let mut builder = SSTableBuilder::new(&tmp_path)?;
        for (key, value) in entries {
            match value {
                Some(v) => builder.add(key, v)?,
                None => builder.add_tombstone(key)?,
            }
        }
        let metadata = builder.finish()?;
        fs::rename(&tmp_path, &path)?;

        tracing::debug!(
            id,
            entries = metadata.entry_count,
            bytes = metadata.file_size,
            "Wrote SSTable"
        );

        // Freshly written and fsynced; no need to re-verify the checksum
        let reader = SSTableReader::open_with(&path, id, self.cache.clone(), false)?;
        Ok(Arc::new(reader))
    }

    /// Record a new table in the manifest and make it visible as the
    /// newest one. Must be called with writes excluded.
    ///
    /// If the manifest cannot be written the table is discarded.
    pub fn install(&self, table: TableRef) -> Result<()> {
        let mut ids = vec![table.id()];
        ids.extend(self.sstables.read().iter().map(|t| t.id()));

        if let Err(e) = Manifest::new(ids).save(&self.data_dir) {
            table.mark_obsolete();
            return Err(e);
        }

        self.sstables.write().insert(0, table);
        Ok(())
    }

    /// Merge all current tables into one, dropping tombstones and
    /// shadowed values.
    ///
    /// Must be called with writes excluded. The new table set is published
    /// through the manifest in one step; retired files are deleted once the
    /// last snapshot holding them is released, and any still on disk after
    /// a crash are removed on the next open.
    pub fn compact(&self) -> Result<()> {
        let tables = self.tables();
        if tables.is_empty() {
            return Ok(());
        }

        // Merged view of all tables, newest wins
        let mut merged: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        let mut lower: Option<Vec<u8>> = None;
        loop {
            let bound = match &lower {
                Some(k) => Bound::Excluded(k.as_slice()),
                None => Bound::Unbounded,
            };
            let Some(key) = Self::next_key_from(&tables, bound).map(|k| k.to_vec()) else {
                break;
            };
            if let Some(value) = Self::get_from(&tables, &key)? {
                merged.push((key.clone(), value));
            }
            lower = Some(key);
        }

        let replacement = if merged.is_empty() {
            None
        } else {
            Some(self.write_table(merged.iter().map(|(k, v)| (k.as_slice(), Some(v.as_slice()))))?)
        };

        let manifest = Manifest::new(replacement.iter().map(|t| t.id()).collect());
        if let Err(e) = manifest.save(&self.data_dir) {
            if let Some(table) = &replacement {
                table.mark_obsolete();
            }
            return Err(e);
        }

        *self.sstables.write() = replacement.into_iter().collect();

        for table in &tables {
            table.mark_obsolete();
        }

        tracing::debug!(
            merged_tables = tables.len(),
            live_entries = merged.len(),
            "Compacted SSTables"
        );
        Ok(())
    }

    /// Approximate bytes of table data holding keys in `[start, end)`
    pub fn approximate_size(&self, start: &[u8], end: &[u8]) -> u64 {
        if start >= end {
            return 0;
        }
        self.sstables
            .read()
            .iter()
            .map(|t| {
                t.approximate_offset_of(end)
                    .saturating_sub(t.approximate_offset_of(start))
            })
            .sum()
    }

    /// True if any table holds a key in `[start, end)`
    pub fn overlaps(&self, start: &[u8], end: &[u8]) -> bool {
        self.sstables.read().iter().any(|t| t.overlaps(start, end))
    }

    /// Get the number of SSTables
    pub fn sstable_count(&self) -> usize {
        self.sstables.read().len()
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get the next SSTable ID (for testing/debugging)
    pub fn next_sstable_id(&self) -> u64 {
        self.next_sstable_id.load(Ordering::SeqCst)
    }

    /// The shared block cache, if enabled
    pub fn cache(&self) -> Option<&Arc<BlockCache>> {
        self.cache.as_ref()
    }

    /// Whether tables are checksum-verified on open
    pub fn paranoid_checks(&self) -> bool {
        self.paranoid_checks
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Generate the file path for an SSTable with given ID
    fn sstable_path(&self, id: u64) -> PathBuf {
        Self::sstable_path_with_dir(&self.data_dir, id)
    }

    /// Generate SSTable path given a directory and ID
    fn sstable_path_with_dir(dir: &Path, id: u64) -> PathBuf {
        dir.join(format!("sstable_{:06}.sst", id))
    }

    /// Parse SSTable ID from filename
    /// "sstable_000042.sst" → Some(42)
    fn parse_sstable_id(path: &Path) -> Option<u64> {
        if path.extension()? != "sst" {
            return None;
        }
        let name = path.file_stem()?.to_string_lossy();
        let id_str = name.strip_prefix("sstable_")?;
        id_str.parse().ok()
    }
}
