//! Write batches
//!
//! A [`DbBatch`] collects typed puts and deletes, encoding and obfuscating
//! them as they are added, and is committed atomically by
//! [`DbWrapper::write_batch`](crate::DbWrapper::write_batch).

use crate::codec::{self, Encode};
use crate::db::encode_key;
use crate::error::Result;
use crate::obfuscation::ObfuscationKey;
use crate::wal::Operation;

/// Fixed overhead charged to every batch (sequence number and count)
const BATCH_HEADER_SIZE: usize = 12;

/// Ordered list of pending writes
///
/// Operations apply in the order they were added, so a later
/// [`erase`](Self::erase) of a key cancels an earlier [`write`](Self::write)
/// of it.
#[derive(Debug, Clone)]
pub struct DbBatch {
    obfuscation_key: ObfuscationKey,
    ops: Vec<Operation>,
    size_estimate: usize,
}

impl DbBatch {
    /// New empty batch whose values are obfuscated with `obfuscation_key`
    pub(crate) fn new(obfuscation_key: ObfuscationKey) -> Self {
        Self {
            obfuscation_key,
            ops: Vec::new(),
            size_estimate: BATCH_HEADER_SIZE,
        }
    }

    /// Queue a put
    pub fn write<K, V>(&mut self, key: &K, value: &V) -> Result<()>
    where
        K: Encode + ?Sized,
        V: Encode + ?Sized,
    {
        let key = encode_key(key)?;
        let mut value = codec::encode(value)?;
        self.obfuscation_key.apply(&mut value);

        self.size_estimate += 1
            + varint_len(key.len())
            + key.len()
            + varint_len(value.len())
            + value.len();
        self.ops.push(Operation::Put { key, value });
        Ok(())
    }

    /// Queue a delete
    pub fn erase<K: Encode + ?Sized>(&mut self, key: &K) -> Result<()> {
        let key = encode_key(key)?;
        self.size_estimate += 1 + varint_len(key.len()) + key.len();
        self.ops.push(Operation::Delete { key });
        Ok(())
    }

    /// Drop every queued operation
    pub fn clear(&mut self) {
        self.ops.clear();
        self.size_estimate = BATCH_HEADER_SIZE;
    }

    /// Approximate serialized size in bytes
    pub fn size_estimate(&self) -> usize {
        self.size_estimate
    }

    /// Number of queued operations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Queued operations, in order
    pub fn operations(&self) -> &[Operation] {
        &self.ops
    }
}

/// Bytes needed to write `n` as an LEB128 varint
fn varint_len(mut n: usize) -> usize {
    let mut len = 1;
    while n >= 0x80 {
        n >>= 7;
        len += 1;
    }
    len
}
