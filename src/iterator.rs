//! Typed snapshot iterator

use crate::codec::{self, Decode, Encode};
use crate::config::FailurePolicy;
use crate::db::abort;
use crate::engine::EngineIterator;
use crate::error::{DbError, Result};
use crate::obfuscation::ObfuscationKey;

/// Smallest non-empty key. Seeking here skips the reserved record, which
/// is stored under the empty key.
pub(crate) const FIRST_APPLICATION_KEY: &[u8] = &[0];

/// Forward iterator over a snapshot taken when it was created.
///
/// Entries are visited in byte order of their encoded keys. Writes made
/// after creation are never observed. The snapshot is released on drop.
pub struct DbIterator {
    inner: EngineIterator,
    obfuscation_key: ObfuscationKey,
    failure_policy: FailurePolicy,
}

impl DbIterator {
    pub(crate) fn new(
        inner: EngineIterator,
        obfuscation_key: ObfuscationKey,
        failure_policy: FailurePolicy,
    ) -> Self {
        Self {
            inner,
            obfuscation_key,
            failure_policy,
        }
    }

    /// Position at the first entry whose encoded key is >= encode(`key`).
    ///
    /// Fails only if `key` cannot be encoded; positioning errors are
    /// reported by [`status`](Self::status).
    pub fn seek<K: Encode + ?Sized>(&mut self, key: &K) -> Result<()> {
        let target = codec::encode(key)?;
        if target.as_slice() < FIRST_APPLICATION_KEY {
            self.inner.seek(FIRST_APPLICATION_KEY);
        } else {
            self.inner.seek(&target);
        }
        self.check_status();
        Ok(())
    }

    /// Position at the first application entry
    pub fn seek_to_first(&mut self) {
        self.inner.seek(FIRST_APPLICATION_KEY);
        self.check_status();
    }

    /// Advance to the next entry; does nothing when not valid
    pub fn next(&mut self) {
        if self.inner.valid() {
            self.inner.next();
            self.check_status();
        }
    }

    fn check_status(&self) {
        if let Some(e) = self.inner.status() {
            if self.failure_policy.is_fatal(e, false) {
                abort(e);
            }
        }
    }

    pub fn valid(&self) -> bool {
        self.inner.valid()
    }

    /// Decode the current key
    pub fn key<K: Decode>(&self) -> Result<K> {
        let raw = self.inner.key().ok_or(DbError::InvalidIterator)?;
        Ok(codec::decode_exact(raw)?)
    }

    /// Decode the current value, undoing obfuscation first
    pub fn value<V: Decode>(&self) -> Result<V> {
        let mut raw = self
            .inner
            .value()
            .ok_or(DbError::InvalidIterator)?
            .to_vec();
        self.obfuscation_key.apply(&mut raw);
        Ok(codec::decode_exact(&raw)?)
    }

    /// Stored length of the current value
    pub fn value_size(&self) -> Option<usize> {
        self.inner.value().map(<[u8]>::len)
    }

    /// Error from the last positioning call, if any
    pub fn status(&self) -> Option<&DbError> {
        self.inner.status()
    }
}
