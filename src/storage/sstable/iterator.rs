//! SSTable Iterator
//!
//! Sequential scan of the data block. Holds the reader's file lock for its
//! whole lifetime; used for checksum verification.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

use parking_lot::MutexGuard;

use crate::error::{DbError, Result};

use super::{read_u32, HEADER_SIZE, TOMBSTONE_MARKER};

/// One raw entry: key and value, `None` for a tombstone
pub type RawEntry = (Vec<u8>, Option<Vec<u8>>);

/// Iterator over SSTable entries in sorted key order
pub struct SSTableIterator<'a> {
    file: MutexGuard<'a, BufReader<File>>,
    /// Stop reading when we reach this offset (start of index block)
    end_offset: u64,
    /// Current position in file
    current_offset: u64,
    /// Running CRC over the raw entry bytes read so far
    hasher: crc32fast::Hasher,
    failed: bool,
}

impl<'a> SSTableIterator<'a> {
    /// Create a new iterator starting from the data block
    pub(super) fn new(mut file: MutexGuard<'a, BufReader<File>>, end_offset: u64) -> Result<Self> {
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        Ok(Self {
            file,
            end_offset,
            current_offset: HEADER_SIZE,
            hasher: crc32fast::Hasher::new(),
            failed: false,
        })
    }

    /// CRC of everything read so far; equals the footer CRC once the
    /// iterator is exhausted
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    fn read_entry(&mut self) -> Result<RawEntry> {
        let mut header = [0u8; 8];
        self.file.read_exact(&mut header)?;

        let key_len = read_u32(&header[0..4]) as u64;
        let val_len = read_u32(&header[4..8]);
        let value_bytes = if val_len == TOMBSTONE_MARKER { 0 } else { val_len as u64 };

        let entry_size = 8 + key_len + value_bytes;
        if self.current_offset + entry_size > self.end_offset {
            return Err(DbError::Corruption(format!(
                "SSTable entry at offset {} overruns the data block",
                self.current_offset
            )));
        }

        let mut key = vec![0u8; key_len as usize];
        self.file.read_exact(&mut key)?;

        self.hasher.update(&header);
        self.hasher.update(&key);

        let value = if val_len == TOMBSTONE_MARKER {
            None
        } else {
            let mut v = vec![0u8; val_len as usize];
            self.file.read_exact(&mut v)?;
            self.hasher.update(&v);
            Some(v)
        };

        self.current_offset += entry_size;
        Ok((key, value))
    }
}

impl<'a> Iterator for SSTableIterator<'a> {
    type Item = Result<RawEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        // Stop at index block
        if self.failed || self.current_offset >= self.end_offset {
            return None;
        }

        let entry = self.read_entry();
        if entry.is_err() {
            self.failed = true;
        }
        Some(entry)
    }
}
