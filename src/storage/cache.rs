//! Block cache
//!
//! Byte-bounded LRU cache for values read from SSTables, keyed by
//! (table id, entry offset). Sized from the store's cache budget.

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use parking_lot::Mutex;

type CacheKey = (u64, u64);

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: u64,

    /// Number of cache misses
    pub misses: u64,

    /// Number of evictions
    pub evictions: u64,

    /// Number of insertions
    pub insertions: u64,
}

impl CacheStats {
    /// Calculate hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct CacheInner {
    /// Value and the generation of its last use
    entries: HashMap<CacheKey, (Bytes, u64)>,
    /// Generation to key, least recently used first
    lru: BTreeMap<u64, CacheKey>,
    next_gen: u64,
    bytes: usize,
    stats: CacheStats,
}

impl CacheInner {
    fn stamp(&mut self, key: CacheKey) -> u64 {
        let generation = self.next_gen;
        self.next_gen += 1;
        self.lru.insert(generation, key);
        generation
    }
}

/// Shared value cache for all SSTable readers of one engine
pub struct BlockCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl BlockCache {
    /// Create a cache holding at most `capacity` value bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Look up a cached value
    pub fn get(&self, table_id: u64, offset: u64) -> Option<Bytes> {
        let mut inner = self.inner.lock();
        let key = (table_id, offset);
        let Some((value, old_gen)) = inner.entries.get(&key).cloned() else {
            inner.stats.misses += 1;
            return None;
        };

        inner.stats.hits += 1;
        inner.lru.remove(&old_gen);
        let generation = inner.stamp(key);
        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.1 = generation;
        }
        Some(value)
    }

    /// Insert a value, evicting least recently used entries to make room.
    /// Values larger than the whole cache are not stored.
    pub fn insert(&self, table_id: u64, offset: u64, value: Bytes) {
        if value.len() > self.capacity {
            return;
        }

        let mut inner = self.inner.lock();
        let key = (table_id, offset);
        let generation = inner.stamp(key);
        inner.bytes += value.len();
        if let Some((old, old_gen)) = inner.entries.insert(key, (value, generation)) {
            inner.bytes -= old.len();
            inner.lru.remove(&old_gen);
        }
        inner.stats.insertions += 1;

        while inner.bytes > self.capacity {
            let Some((_, victim)) = inner.lru.pop_first() else {
                break;
            };
            if let Some((evicted, _)) = inner.entries.remove(&victim) {
                inner.bytes -= evicted.len();
                inner.stats.evictions += 1;
            }
        }
    }

    /// Drop every entry belonging to a table (it was compacted away)
    pub fn evict_table(&self, table_id: u64) {
        let mut inner = self.inner.lock();
        let CacheInner {
            entries, lru, bytes, ..
        } = &mut *inner;
        entries.retain(|&(id, _), (value, _)| {
            if id == table_id {
                *bytes -= value.len();
                false
            } else {
                true
            }
        });
        lru.retain(|_, &mut (id, _)| id != table_id);
    }

    /// Number of cached values
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently held
    pub fn usage(&self) -> usize {
        self.inner.lock().bytes
    }

    /// Configured capacity in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of the statistics
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats.clone()
    }
}
