//! Error types for indexdb
//!
//! Provides a unified error type for all operations. Corruption is kept
//! distinct from ordinary I/O failures so the store can apply its
//! failure policy.

use std::path::PathBuf;

use thiserror::Error;

use crate::codec::CodecError;

/// Result type alias using DbError
pub type Result<T> = std::result::Result<T, DbError>;

/// Unified error type for indexdb operations
#[derive(Debug, Error)]
pub enum DbError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Integrity Errors
    // -------------------------------------------------------------------------
    /// On-disk data failed a checksum or structural check.
    #[error("Corruption detected: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("WAL write failed: {0}")]
    WalWrite(String),

    #[error("Key not found")]
    KeyNotFound,

    // -------------------------------------------------------------------------
    // Open Errors
    // -------------------------------------------------------------------------
    #[error("Database directory is locked by another handle: {}", .0.display())]
    Locked(PathBuf),

    #[error("Failed to open database at {}: {reason}", .path.display())]
    Open { path: PathBuf, reason: String },

    // -------------------------------------------------------------------------
    // Typed Access Errors
    // -------------------------------------------------------------------------
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Key encodes to the reserved empty key")]
    ReservedKey,

    #[error("Iterator is not positioned on an entry")]
    InvalidIterator,

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DbError {
    /// True for errors that mean the on-disk state cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(self, DbError::Corruption(_))
    }

    /// True for failures raised by the storage engine itself, as opposed
    /// to caller mistakes (bad keys, decode mismatches, invalid iterators).
    pub fn is_engine_failure(&self) -> bool {
        matches!(
            self,
            DbError::Io(_)
                | DbError::Corruption(_)
                | DbError::Storage(_)
                | DbError::WalWrite(_)
                | DbError::Serialization(_)
        )
    }

    /// True when the stored bytes did not match the requested type.
    pub fn is_decode_error(&self) -> bool {
        matches!(self, DbError::Codec(e) if e.is_decode())
    }
}

impl From<bincode::Error> for DbError {
    fn from(e: bincode::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}
