//! Storage Module
//!
//! Persistent storage layer using SSTable-like format.
//!
//! ## Responsibilities
//! - Persist flushed MemTables to disk in sorted format
//! - Point lookups and ordered key scans across tables
//! - Full compaction once the table count reaches its limit
//! - Value caching shared by all open tables
//!
//! See [`sstable`] for the on-disk layout.

mod cache;
mod manager;
mod manifest;
pub mod sstable;

pub use cache::{BlockCache, CacheStats};
pub use manager::{StorageManager, TableRef};
pub use manifest::{Manifest, MANIFEST_FILENAME};
pub use sstable::{SSTable, SSTableBuilder, SSTableIterator, SSTableReader};
