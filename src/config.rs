//! Configuration for indexdb
//!
//! Centralized configuration with sensible defaults. The first five
//! fields are the parameters a host passes when opening a store; the rest
//! tune the embedded engine.

use std::path::PathBuf;

use crate::error::DbError;

/// Smallest write buffer the engine will use, whatever the cache size.
pub const MIN_WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Main configuration for a store instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Open Parameters
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── LOCK             (exclusive directory lock)
    ///     ├── wal.log          (write-ahead log)
    ///     └── sstables/        (SSTable files)
    pub data_dir: PathBuf,

    /// Total cache budget in bytes, split between the write buffer and the
    /// block cache
    pub cache_bytes: usize,

    /// Keep everything in memory; nothing is written under `data_dir`
    pub memory_only: bool,

    /// Destroy any existing data at `data_dir` before opening (reindex)
    pub wipe_existing: bool,

    /// Obfuscate values if this open creates the store
    pub obfuscate: bool,

    // -------------------------------------------------------------------------
    // Engine Configuration
    // -------------------------------------------------------------------------
    /// Verify checksums when loading WAL records and SSTables
    pub paranoid_checks: bool,

    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    /// Merge all SSTables into one once this many exist
    pub max_sstables: usize,

    /// Explicit memtable flush threshold, overriding the cache-derived one
    pub write_buffer_limit: Option<usize>,

    // -------------------------------------------------------------------------
    // Failure Handling
    // -------------------------------------------------------------------------
    /// What to do when the engine reports a failure
    pub failure_policy: FailurePolicy,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

/// How the store reacts to engine failures.
///
/// A corrupted index must never feed further decisions, so the default
/// terminates the process on corruption. Hosts that can rebuild the index
/// themselves may choose to receive every failure as an error instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Log and terminate on corruption; return other failures as errors
    #[default]
    AbortOnCorruption,

    /// Log and terminate on corruption and on any failed write, erase or
    /// batch commit
    AbortOnAnyFailure,

    /// Return every failure, corruption included, as an error
    Propagate,
}

impl FailurePolicy {
    /// Whether `err` should terminate the process. `during_write` marks
    /// failures of write, erase and batch commits.
    pub fn is_fatal(&self, err: &DbError, during_write: bool) -> bool {
        match self {
            FailurePolicy::AbortOnCorruption => err.is_corruption(),
            FailurePolicy::AbortOnAnyFailure => {
                err.is_corruption() || (during_write && err.is_engine_failure())
            }
            FailurePolicy::Propagate => false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./indexdb_data"),
            cache_bytes: 8 * 1024 * 1024, // 8 MB
            memory_only: false,
            wipe_existing: false,
            obfuscate: false,
            paranoid_checks: true,
            wal_sync_strategy: WalSyncStrategy::EveryNEntries { count: 100 },
            max_sstables: 8,
            write_buffer_limit: None,
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl Config {
    /// Create a config from the five open parameters, defaults elsewhere
    pub fn new(
        data_dir: impl Into<PathBuf>,
        cache_bytes: usize,
        memory_only: bool,
        wipe_existing: bool,
        obfuscate: bool,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            cache_bytes,
            memory_only,
            wipe_existing,
            obfuscate,
            ..Self::default()
        }
    }

    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Memtable size that triggers a flush: a quarter of the cache budget
    /// unless set explicitly
    pub fn write_buffer_size(&self) -> usize {
        match self.write_buffer_limit {
            Some(limit) => limit,
            None => (self.cache_bytes / 4).max(MIN_WRITE_BUFFER_SIZE),
        }
    }

    /// Byte capacity of the SSTable block cache: half of the cache budget
    pub fn block_cache_size(&self) -> usize {
        self.cache_bytes / 2
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), DbError> {
        if self.max_sstables == 0 {
            return Err(DbError::Config("max_sstables must be at least 1".to_string()));
        }
        if self.write_buffer_limit == Some(0) {
            return Err(DbError::Config("write buffer size must be non-zero".to_string()));
        }
        if self.wal_sync_strategy == (WalSyncStrategy::EveryNEntries { count: 0 }) {
            return Err(DbError::Config("WAL sync interval must be at least 1 entry".to_string()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the total cache budget (in bytes)
    pub fn cache_bytes(mut self, bytes: usize) -> Self {
        self.config.cache_bytes = bytes;
        self
    }

    /// Keep the store purely in memory
    pub fn memory_only(mut self, memory_only: bool) -> Self {
        self.config.memory_only = memory_only;
        self
    }

    /// Wipe existing data on open
    pub fn wipe_existing(mut self, wipe: bool) -> Self {
        self.config.wipe_existing = wipe;
        self
    }

    /// Request value obfuscation for a newly created store
    pub fn obfuscate(mut self, obfuscate: bool) -> Self {
        self.config.obfuscate = obfuscate;
        self
    }

    /// Enable or disable checksum verification on load
    pub fn paranoid_checks(mut self, enabled: bool) -> Self {
        self.config.paranoid_checks = enabled;
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the SSTable count that triggers a full compaction
    pub fn max_sstables(mut self, count: usize) -> Self {
        self.config.max_sstables = count;
        self
    }

    /// Set the memtable flush threshold (in bytes)
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.config.write_buffer_limit = Some(size);
        self
    }

    /// Set the failure policy
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
