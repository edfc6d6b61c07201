//! Store handle
//!
//! [`DbWrapper`] is the typed front of the engine: keys and values go
//! through the codec, values are obfuscated at rest, and engine failures
//! are routed through the configured [`FailurePolicy`].

use std::path::Path;

use crate::batch::DbBatch;
use crate::codec::{self, Decode, Encode};
use crate::config::{Config, FailurePolicy};
use crate::engine::Engine;
use crate::error::{DbError, Result};
use crate::iterator::{DbIterator, FIRST_APPLICATION_KEY};
use crate::obfuscation::{ObfuscationKey, OBFUSCATION_KEY_RECORD};

/// Encode an application key, rejecting the reserved empty key
pub(crate) fn encode_key<K: Encode + ?Sized>(key: &K) -> Result<Vec<u8>> {
    let bytes = codec::encode(key)?;
    if bytes.as_slice() == OBFUSCATION_KEY_RECORD {
        return Err(DbError::ReservedKey);
    }
    Ok(bytes)
}

/// Apply the failure policy to an engine result
pub(crate) fn check<T>(policy: FailurePolicy, result: Result<T>, during_write: bool) -> Result<T> {
    match result {
        Err(e) if policy.is_fatal(&e, during_write) => abort(&e),
        other => other,
    }
}

/// Log and terminate the process
pub(crate) fn abort(err: &DbError) -> ! {
    tracing::error!(error = %err, "Fatal database failure, terminating");
    std::process::exit(1)
}

/// Handle to one open store
///
/// Holds the directory lock until closed or dropped. Safe to share between
/// threads; writes are serialized inside the engine.
pub struct DbWrapper {
    engine: Engine,
    obfuscation_key: ObfuscationKey,
    failure_policy: FailurePolicy,
}

impl DbWrapper {
    /// Open (or create) the store described by `config`
    ///
    /// On startup:
    /// 1. Wipe existing data if requested
    /// 2. Open the engine (takes the directory lock)
    /// 3. Establish the obfuscation key
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        if config.wipe_existing && !config.memory_only {
            tracing::info!(path = %config.data_dir.display(), "Wiping existing data");
            Engine::destroy(&config.data_dir)?;
        }

        let engine = Engine::open(&config)?;
        tracing::info!(
            path = %config.data_dir.display(),
            memory_only = config.memory_only,
            write_buffer = config.write_buffer_size(),
            block_cache = config.block_cache_size(),
            "Opened database"
        );

        let obfuscation_key = Self::init_obfuscation_key(&engine, config.obfuscate)?;
        tracing::info!(key = %obfuscation_key, "Using obfuscation key");

        Ok(Self {
            engine,
            obfuscation_key,
            failure_policy: config.failure_policy,
        })
    }

    /// Adopt the stored key, or create one if this open creates the store
    fn init_obfuscation_key(engine: &Engine, obfuscate: bool) -> Result<ObfuscationKey> {
        if let Some(raw) = engine.get(OBFUSCATION_KEY_RECORD)? {
            return ObfuscationKey::from_slice(&raw).ok_or_else(|| {
                DbError::Corruption(format!(
                    "Obfuscation key record has {} bytes, expected {}",
                    raw.len(),
                    crate::obfuscation::OBFUSCATION_KEY_LEN
                ))
            });
        }

        if obfuscate && Self::engine_is_empty(engine)? {
            let key = ObfuscationKey::generate();
            engine.put(OBFUSCATION_KEY_RECORD, key.as_bytes(), true)?;
            tracing::info!(key = %key, "Wrote new obfuscation key");
            return Ok(key);
        }

        Ok(ObfuscationKey::IDENTITY)
    }

    fn engine_is_empty(engine: &Engine) -> Result<bool> {
        let mut iter = engine.iter();
        iter.seek(FIRST_APPLICATION_KEY);
        if let Some(e) = iter.take_status() {
            return Err(e);
        }
        Ok(!iter.valid())
    }

    // =========================================================================
    // Point Operations
    // =========================================================================

    /// Read and decode the value stored under `key`
    ///
    /// `Ok(None)` when the key is absent.
    pub fn read<K, V>(&self, key: &K) -> Result<Option<V>>
    where
        K: Encode + ?Sized,
        V: Decode,
    {
        let key = encode_key(key)?;
        let raw = self.check(self.engine.get(&key), false)?;
        match raw {
            Some(mut bytes) => {
                self.obfuscation_key.apply(&mut bytes);
                Ok(Some(codec::decode_exact(&bytes)?))
            }
            None => Ok(None),
        }
    }

    /// Store `value` under `key`
    pub fn write<K, V>(&self, key: &K, value: &V, sync: bool) -> Result<()>
    where
        K: Encode + ?Sized,
        V: Encode + ?Sized,
    {
        let mut batch = self.new_batch();
        batch.write(key, value)?;
        self.write_batch(batch, sync)
    }

    /// Remove `key`; removing an absent key succeeds
    pub fn erase<K: Encode + ?Sized>(&self, key: &K, sync: bool) -> Result<()> {
        let mut batch = self.new_batch();
        batch.erase(key)?;
        self.write_batch(batch, sync)
    }

    /// Whether `key` is present, without decoding its value
    pub fn exists<K: Encode + ?Sized>(&self, key: &K) -> Result<bool> {
        let key = encode_key(key)?;
        Ok(self.check(self.engine.get(&key), false)?.is_some())
    }

    /// True when the store holds no application keys
    pub fn is_empty(&self) -> Result<bool> {
        self.check(Self::engine_is_empty(&self.engine), false)
    }

    // =========================================================================
    // Batches and Iteration
    // =========================================================================

    /// Empty batch bound to this store's obfuscation key
    pub fn new_batch(&self) -> DbBatch {
        DbBatch::new(self.obfuscation_key)
    }

    /// Commit `batch` atomically; `sync` waits for it to reach disk
    pub fn write_batch(&self, batch: DbBatch, sync: bool) -> Result<()> {
        tracing::trace!(
            ops = batch.len(),
            bytes = batch.size_estimate(),
            sync,
            "Writing batch"
        );
        self.check(self.engine.write(batch.operations(), sync), true)
    }

    /// Iterator over a snapshot of the current contents
    pub fn new_iterator(&self) -> DbIterator {
        DbIterator::new(self.engine.iter(), self.obfuscation_key, self.failure_policy)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Approximate on-disk bytes used by keys in `[start, end)`
    pub fn estimate_size<K: Encode + ?Sized>(&self, start: &K, end: &K) -> Result<u64> {
        let start = codec::encode(start)?;
        let end = codec::encode(end)?;
        Ok(self.engine.approximate_size(&start, &end))
    }

    /// Compact storage holding keys in `[start, end)`
    pub fn compact_range<K: Encode + ?Sized>(&self, start: &K, end: &K) -> Result<()> {
        let start = codec::encode(start)?;
        let end = codec::encode(end)?;
        self.check(self.engine.compact_range(Some(&start), Some(&end)), true)
    }

    /// Move buffered writes into table files
    pub fn flush(&self) -> Result<()> {
        self.check(self.engine.flush(), true)
    }

    /// Flush and release the directory lock
    pub fn close(self) -> Result<()> {
        let policy = self.failure_policy;
        check(policy, self.engine.close(), true)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The key values are obfuscated with (all zero when disabled)
    pub fn obfuscation_key(&self) -> ObfuscationKey {
        self.obfuscation_key
    }

    /// Approximate bytes held in memory by buffers and caches
    pub fn memory_usage(&self) -> usize {
        self.engine.memory_usage()
    }

    pub fn data_dir(&self) -> &Path {
        self.engine.data_dir()
    }

    /// The underlying engine
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    fn check<T>(&self, result: Result<T>, during_write: bool) -> Result<T> {
        check(self.failure_policy, result, during_write)
    }
}
