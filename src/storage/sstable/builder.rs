//! SSTable Builder
//!
//! Streams entries in strictly increasing key order into a new table file.
//! The entry count in the header is patched in by `finish`, once known.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{DbError, Result};

use super::{SSTable, HEADER_SIZE, MAGIC, TOMBSTONE_MARKER, VERSION};

/// Byte position of the entry count inside the header
const COUNT_POSITION: u64 = (MAGIC.len() + std::mem::size_of::<u16>()) as u64;

/// Builder for creating new SSTables from sorted entries
pub struct SSTableBuilder {
    path: PathBuf,
    out: BufWriter<File>,
    /// Scratch space reused for each encoded entry
    scratch: Vec<u8>,
    /// (key, offset) of every entry, in key order
    index: Vec<(Vec<u8>, u64)>,
    crc: crc32fast::Hasher,
    /// Offset the next entry will be written at
    offset: u64,
    entries: u64,
    tombstones: u64,
}

impl SSTableBuilder {
    /// Create the file at `path` (replacing any existing one) and write a
    /// provisional header.
    pub fn new(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut header = Vec::with_capacity(HEADER_SIZE as usize);
        header.extend_from_slice(MAGIC);
        header.extend_from_slice(&VERSION.to_le_bytes());
        header.extend_from_slice(&0u64.to_le_bytes());

        let mut out = BufWriter::new(file);
        out.write_all(&header)?;

        Ok(Self {
            path: path.to_path_buf(),
            out,
            scratch: Vec::new(),
            index: Vec::new(),
            crc: crc32fast::Hasher::new(),
            offset: HEADER_SIZE,
            entries: 0,
            tombstones: 0,
        })
    }

    /// Append a live value
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.append(key, Some(value))
    }

    /// Append a deletion marker for `key`
    pub fn add_tombstone(&mut self, key: &[u8]) -> Result<()> {
        self.append(key, None)?;
        self.tombstones += 1;
        Ok(())
    }

    fn append(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        if let Some((last, _)) = self.index.last() {
            if key <= last.as_slice() {
                return Err(DbError::Storage(format!(
                    "SSTable keys must be strictly increasing: {:?} after {:?}",
                    key, last
                )));
            }
        }

        let value_len = match value {
            Some(v) if v.len() as u64 >= TOMBSTONE_MARKER as u64 => {
                return Err(DbError::Storage("SSTable value too large".to_string()));
            }
            Some(v) => v.len() as u32,
            None => TOMBSTONE_MARKER,
        };

        self.scratch.clear();
        self.scratch.extend_from_slice(&(key.len() as u32).to_le_bytes());
        self.scratch.extend_from_slice(&value_len.to_le_bytes());
        self.scratch.extend_from_slice(key);
        self.scratch.extend_from_slice(value.unwrap_or_default());

        self.out.write_all(&self.scratch)?;
        self.crc.update(&self.scratch);

        self.index.push((key.to_vec(), self.offset));
        self.offset += self.scratch.len() as u64;
        self.entries += 1;
        Ok(())
    }

    /// Number of entries added so far
    pub fn entry_count(&self) -> u64 {
        self.entries
    }

    /// Write the index and footer, fix up the header and sync the file
    pub fn finish(mut self) -> Result<SSTable> {
        let index_offset = self.offset;

        // Index records are [KeyLen u32][Offset u64][Key]
        self.scratch.clear();
        for (key, offset) in &self.index {
            self.scratch.extend_from_slice(&(key.len() as u32).to_le_bytes());
            self.scratch.extend_from_slice(&offset.to_le_bytes());
            self.scratch.extend_from_slice(key);
        }
        self.scratch.extend_from_slice(&index_offset.to_le_bytes());
        self.scratch.extend_from_slice(&self.crc.clone().finalize().to_le_bytes());
        self.scratch.extend_from_slice(&[0u8; 4]);
        self.out.write_all(&self.scratch)?;

        let mut file = self
            .out
            .into_inner()
            .map_err(|e| DbError::Storage(format!("Failed to flush SSTable: {}", e.error())))?;
        file.seek(SeekFrom::Start(COUNT_POSITION))?;
        file.write_all(&self.entries.to_le_bytes())?;
        file.sync_all()?;
        let file_size = file.metadata()?.len();

        let mut keys = self.index.into_iter().map(|(key, _)| key);
        let min_key = keys.next().unwrap_or_default();
        let max_key = keys.last().unwrap_or_else(|| min_key.clone());

        Ok(SSTable {
            path: self.path,
            entry_count: self.entries,
            tombstone_count: self.tombstones,
            min_key,
            max_key,
            file_size,
        })
    }
}
