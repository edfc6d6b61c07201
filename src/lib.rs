//! # indexdb
//!
//! An embedded, byte-oriented index store with:
//! - Typed keys and values through a small order-preserving codec
//! - Reversible XOR obfuscation of values at rest (not encryption)
//! - Atomic write batches
//! - Snapshot-isolated forward iteration with seek
//! - Write-Ahead Logging (WAL) and crash recovery underneath
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              DbWrapper / DbBatch / DbIterator                │
//! │        (codec, obfuscation, failure policy, reserved key)    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Engine                                │
//! │     (single writer, snapshot readers, directory lock)        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │     WAL     │          │  MemTable   │
//!   │  (Append)   │          │ (Arc, COW)  │
//!   └─────────────┘          └──────┬──────┘
//!                                   │
//!                                   ▼
//!                           ┌─────────────┐
//!                           │   Storage   │
//!                           │  (SSTable)  │
//!                           └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use indexdb::{Config, DbWrapper};
//!
//! # fn main() -> indexdb::Result<()> {
//! let db = DbWrapper::open(Config::new("/tmp/index", 1 << 20, false, false, true))?;
//! db.write(&(b'k', 42u32), &7u64, false)?;
//! assert_eq!(db.read::<_, u64>(&(b'k', 42u32))?, Some(7));
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod codec;
pub mod config;
pub mod error;
pub mod obfuscation;

pub mod engine;
pub mod memtable;
pub mod storage;
pub mod wal;

pub mod batch;
pub mod db;
pub mod iterator;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use batch::DbBatch;
pub use codec::{Bincode, CodecError, Decode, Encode};
pub use config::{Config, FailurePolicy, WalSyncStrategy};
pub use db::DbWrapper;
pub use engine::Engine;
pub use error::{DbError, Result};
pub use iterator::DbIterator;
pub use obfuscation::ObfuscationKey;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of indexdb
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
