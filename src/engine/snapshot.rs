//! Snapshots and snapshot iteration
//!
//! A snapshot pins the memtable and the table list that were current when
//! it was taken. Both are immutable behind their `Arc`s: writers replace the
//! memtable copy-on-write and retired tables stay on disk until the last
//! snapshot referencing them drops.

use std::ops::Bound;
use std::sync::Arc;

use crate::error::{DbError, Result};
use crate::memtable::{MemTable, MemTableEntry};
use crate::storage::{StorageManager, TableRef};

/// Point-in-time view of the engine's key space
#[derive(Clone)]
pub struct Snapshot {
    mem: Arc<MemTable>,
    /// Newest first
    tables: Vec<TableRef>,
}

impl Snapshot {
    pub(crate) fn new(mem: Arc<MemTable>, tables: Vec<TableRef>) -> Self {
        Self { mem, tables }
    }

    /// Get a value by key as of this snapshot
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.mem.get(key) {
            Some(MemTableEntry::Value(value)) => Ok(Some(value.to_vec())),
            Some(MemTableEntry::Tombstone) => Ok(None),
            None => StorageManager::get_from(&self.tables, key),
        }
    }

    /// Iterate over this snapshot
    pub fn iter(self) -> EngineIterator {
        EngineIterator::new(self)
    }

    /// Number of tables pinned by this snapshot
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Smallest key (live or deleted) satisfying the lower bound
    fn next_candidate(&self, lower: Bound<&[u8]>) -> Option<Vec<u8>> {
        let from_mem = self.mem.first_from(lower).map(|(k, _)| k);
        let from_tables = StorageManager::next_key_from(&self.tables, lower);
        match (from_mem, from_tables) {
            (Some(a), Some(b)) => Some(a.min(b).to_vec()),
            (Some(k), None) | (None, Some(k)) => Some(k.to_vec()),
            (None, None) => None,
        }
    }

    /// First live entry satisfying the lower bound
    fn first_live(&self, lower: Bound<&[u8]>) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut candidate = self.next_candidate(lower);
        while let Some(key) = candidate {
            if let Some(value) = self.get(&key)? {
                return Ok(Some((key, value)));
            }
            // Deleted; move past it
            candidate = self.next_candidate(Bound::Excluded(&key));
        }
        Ok(None)
    }
}

/// Forward iterator over a snapshot, in byte-lexicographic key order.
///
/// Starts unpositioned; call [`seek`](Self::seek) or
/// [`seek_to_first`](Self::seek_to_first) first.
pub struct EngineIterator {
    snapshot: Snapshot,
    current: Option<(Vec<u8>, Vec<u8>)>,
    status: Option<DbError>,
}

impl EngineIterator {
    fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            current: None,
            status: None,
        }
    }

    /// Position at the first entry whose key is >= `target`
    pub fn seek(&mut self, target: &[u8]) {
        self.position(Bound::Included(target));
    }

    /// Position at the first entry
    pub fn seek_to_first(&mut self) {
        self.position(Bound::Unbounded);
    }

    /// Advance to the next entry. Does nothing when not valid.
    pub fn next(&mut self) {
        if let Some((key, _)) = self.current.take() {
            self.position(Bound::Excluded(&key));
        }
    }

    fn position(&mut self, lower: Bound<&[u8]>) {
        match self.snapshot.first_live(lower) {
            Ok(entry) => {
                self.current = entry;
                self.status = None;
            }
            Err(e) => {
                self.current = None;
                self.status = Some(e);
            }
        }
    }

    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    /// Current key, if positioned
    pub fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(k, _)| k.as_slice())
    }

    /// Current value, if positioned
    pub fn value(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(_, v)| v.as_slice())
    }

    /// Error hit by the last positioning call, if any
    pub fn status(&self) -> Option<&DbError> {
        self.status.as_ref()
    }

    /// Take the positioning error out, leaving the status clear
    pub fn take_status(&mut self) -> Option<DbError> {
        self.status.take()
    }

    /// The snapshot being iterated
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }
}
