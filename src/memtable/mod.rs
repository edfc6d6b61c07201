//! MemTable Module
//!
//! In-memory data structure for recent writes.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory
//! - Apply write batches in order
//! - Track size for flush triggers
//! - Ordered iteration and range seeks for SSTable creation and snapshots
//!
//! ## Data Structure Choice
//! A BTreeMap owned by the engine behind `Arc`:
//! - Ordered keys (required for SSTable generation and iteration)
//! - Snapshots share the current table by cloning the `Arc`
//! - Writers go through `Arc::make_mut`, so a table still referenced by a
//!   snapshot is copied once and the snapshot keeps the old contents

mod table;

use bytes::Bytes;

pub use table::MemTable;

/// Entry stored in the MemTable
#[derive(Debug, Clone, PartialEq)]
pub enum MemTableEntry {
    /// A live value
    Value(Bytes),

    /// A tombstone (deleted key)
    Tombstone,
}
