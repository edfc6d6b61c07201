//! MemTable implementation
//!
//! BTreeMap-based memtable. Locking is done by the engine, which keeps the
//! table behind `RwLock<Arc<MemTable>>`.

use std::collections::BTreeMap;
use std::ops::Bound;

use bytes::Bytes;

use super::MemTableEntry;
use crate::wal::Operation;

/// Per-entry bookkeeping charged on top of key and value bytes
const ENTRY_OVERHEAD: usize = 16;

/// In-memory table for recent writes
#[derive(Debug, Clone, Default)]
pub struct MemTable {
    data: BTreeMap<Vec<u8>, MemTableEntry>,
    /// Approximate size in bytes
    size: usize,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a key. `Some(Tombstone)` means the key was deleted here.
    pub fn get(&self, key: &[u8]) -> Option<MemTableEntry> {
        self.data.get(key).cloned()
    }

    /// Put a key-value pair, returning the new approximate size
    pub fn put(&mut self, key: Vec<u8>, value: impl Into<Bytes>) -> usize {
        self.insert(key, MemTableEntry::Value(value.into()))
    }

    /// Delete a key (inserts tombstone), returning the new approximate size
    pub fn delete(&mut self, key: Vec<u8>) -> usize {
        self.insert(key, MemTableEntry::Tombstone)
    }

    /// Apply operations in order, returning the new approximate size
    pub fn apply(&mut self, ops: &[Operation]) -> usize {
        for op in ops {
            match op {
                Operation::Put { key, value } => {
                    self.put(key.clone(), Bytes::copy_from_slice(value));
                }
                Operation::Delete { key } => {
                    self.delete(key.clone());
                }
            }
        }
        self.size
    }

    fn insert(&mut self, key: Vec<u8>, entry: MemTableEntry) -> usize {
        let key_len = key.len();
        let added = Self::entry_size(key_len, &entry);
        if let Some(old) = self.data.insert(key, entry) {
            self.size -= Self::entry_size(key_len, &old);
        }
        self.size += added;
        self.size
    }

    fn entry_size(key_len: usize, entry: &MemTableEntry) -> usize {
        let value_len = match entry {
            MemTableEntry::Value(v) => v.len(),
            MemTableEntry::Tombstone => 0,
        };
        key_len + value_len + ENTRY_OVERHEAD
    }

    /// Get approximate size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get entry count (tombstones included)
    pub fn entry_count(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check if should flush (size >= limit)
    pub fn should_flush(&self, size_limit: usize) -> bool {
        self.size >= size_limit
    }

    /// Iterate over all entries in sorted key order (for flush)
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &MemTableEntry)> {
        self.data.iter().map(|(k, v)| (k.as_slice(), v))
    }

    /// First entry whose key satisfies the lower bound
    pub fn first_from(&self, lower: Bound<&[u8]>) -> Option<(&[u8], &MemTableEntry)> {
        self.data
            .range::<[u8], _>((lower, Bound::Unbounded))
            .next()
            .map(|(k, v)| (k.as_slice(), v))
    }

    /// Clear all entries (after successful flush)
    pub fn clear(&mut self) {
        self.data.clear();
        self.size = 0;
    }
}
