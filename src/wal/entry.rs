//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries. One entry holds one
//! write batch, so a batch is either replayed whole or not at all.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{DbError, Result};

/// Frame header: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// The operations of one write batch, in application order
    pub ops: Vec<Operation>,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },
}

impl Operation {
    /// The key this operation touches
    pub fn key(&self) -> &[u8] {
        match self {
            Operation::Put { key, .. } | Operation::Delete { key } => key,
        }
    }
}

/// Borrowed view of a [`WalEntry`]; serializes to the same bytes
#[derive(Serialize)]
struct EntryRef<'a> {
    lsn: u64,
    ops: &'a [Operation],
    timestamp: u64,
}

/// Outcome of parsing one frame from the front of a buffer
#[derive(Debug)]
pub enum Frame {
    /// A valid entry and the number of bytes it occupied
    Complete(WalEntry, usize),

    /// The buffer ends before the frame does (torn write)
    Incomplete,

    /// The frame is complete but its checksum does not match
    BadChecksum { lsn: u64 },
}

impl WalEntry {
    /// Create an entry stamped with the current time
    pub fn new(lsn: u64, ops: Vec<Operation>) -> Self {
        Self {
            lsn,
            ops,
            timestamp: now_millis(),
        }
    }

    /// Serialize to a framed record: [LSN][CRC][Len][Data]
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Self::frame(&EntryRef {
            lsn: self.lsn,
            ops: &self.ops,
            timestamp: self.timestamp,
        })
    }

    /// Frame a batch without taking ownership of its operations
    pub fn encode(lsn: u64, ops: &[Operation]) -> Result<Vec<u8>> {
        Self::frame(&EntryRef {
            lsn,
            ops,
            timestamp: now_millis(),
        })
    }

    fn frame(entry: &EntryRef<'_>) -> Result<Vec<u8>> {
        let data = bincode::serialize(entry)?;
        let crc = Self::compute_crc(entry.lsn, &data);

        let mut frame = Vec::with_capacity(HEADER_SIZE + data.len());
        frame.extend_from_slice(&entry.lsn.to_le_bytes());
        frame.extend_from_slice(&crc.to_le_bytes());
        frame.extend_from_slice(&(data.len() as u32).to_le_bytes());
        frame.extend_from_slice(&data);
        Ok(frame)
    }

    /// Parse the frame at the front of `buf`
    pub fn decode_frame(buf: &[u8]) -> Result<Frame> {
        if buf.len() < HEADER_SIZE {
            return Ok(Frame::Incomplete);
        }

        let lsn = read_u64(&buf[0..8]);
        let stored_crc = read_u32(&buf[8..12]);
        let len = read_u32(&buf[12..16]) as usize;

        let total = HEADER_SIZE + len;
        if buf.len() < total {
            return Ok(Frame::Incomplete);
        }

        let data = &buf[HEADER_SIZE..total];
        if Self::compute_crc(lsn, data) != stored_crc {
            return Ok(Frame::BadChecksum { lsn });
        }

        let entry: WalEntry = bincode::deserialize(data).map_err(|e| {
            DbError::Corruption(format!("WAL entry {} failed to decode: {}", lsn, e))
        })?;
        if entry.lsn != lsn {
            return Err(DbError::Corruption(format!(
                "WAL frame LSN {} does not match entry LSN {}",
                lsn, entry.lsn
            )));
        }

        Ok(Frame::Complete(entry, total))
    }

    /// CRC32 over the LSN and the serialized entry
    pub fn compute_crc(lsn: u64, data: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&lsn.to_le_bytes());
        hasher.update(data);
        hasher.finalize()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}
