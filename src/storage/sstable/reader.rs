//! SSTable Reader
//!
//! Opens SSTable files and provides O(log n) key lookups via in-memory index.
//! Readers are shared between the engine and open snapshots, so the file
//! handle sits behind a mutex and every method takes `&self`.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{DbError, Result};
use crate::storage::cache::BlockCache;

use super::iterator::SSTableIterator;
use super::{read_u32, read_u64, FOOTER_SIZE, HEADER_SIZE, MAGIC, TOMBSTONE_MARKER, VERSION};

/// Reader for SSTable files with in-memory index for O(log n) lookups
pub struct SSTableReader {
    /// Table id (from the file name), used as the cache namespace
    id: u64,
    path: PathBuf,
    /// File handle for reading entries
    file: Mutex<BufReader<File>>,
    /// In-memory index: key → file offset
    index: BTreeMap<Vec<u8>, u64>,
    /// Metadata
    entry_count: u64,
    /// Index block starting offset (end of the data block)
    index_offset: u64,
    file_size: u64,
    data_crc: u32,
    cache: Option<Arc<BlockCache>>,
    /// Set once the table has been compacted away; the file is removed when
    /// the last reference drops
    obsolete: AtomicBool,
}

impl SSTableReader {
    /// Open an SSTable for reading, without cache or checksum verification
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, 0, None, false)
    }

    /// Open an SSTable for reading
    ///
    /// Loads the entire index into memory for fast lookups. With
    /// `verify_checksum`, the whole data block is read once and checked
    /// against the footer CRC.
    pub fn open_with(
        path: &Path,
        id: u64,
        cache: Option<Arc<BlockCache>>,
        verify_checksum: bool,
    ) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(DbError::Corruption(format!(
                "SSTable {} is too short ({} bytes)",
                path.display(),
                file_size
            )));
        }

        // Read and validate header
        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;

        if &header[0..4] != MAGIC {
            return Err(DbError::Corruption(format!(
                "Invalid SSTable magic in {}: got {:?}",
                path.display(),
                &header[0..4]
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(DbError::Storage(format!(
                "Unsupported SSTable version: {}",
                version
            )));
        }

        let entry_count = read_u64(&header[6..14]);

        // Read footer to get index offset
        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;

        let index_offset = read_u64(&footer[0..8]);
        let data_crc = read_u32(&footer[8..12]);

        if index_offset < HEADER_SIZE || index_offset > file_size - FOOTER_SIZE {
            return Err(DbError::Corruption(format!(
                "SSTable {} has index offset {} outside the file",
                path.display(),
                index_offset
            )));
        }

        // Load index block: [key_len(4)][offset(8)][key] for each entry
        file.seek(SeekFrom::Start(index_offset))?;
        let index_block_size = file_size - FOOTER_SIZE - index_offset;
        let mut index_data = vec![0u8; index_block_size as usize];
        file.read_exact(&mut index_data)?;

        let index = Self::parse_index(path, &index_data, index_offset)?;
        if index.len() as u64 != entry_count {
            return Err(DbError::Corruption(format!(
                "SSTable {} header claims {} entries, index holds {}",
                path.display(),
                entry_count,
                index.len()
            )));
        }

        let reader = Self {
            id,
            path: path.to_path_buf(),
            file: Mutex::new(BufReader::new(file)),
            index,
            entry_count,
            index_offset,
            file_size,
            data_crc,
            cache,
            obsolete: AtomicBool::new(false),
        };

        if verify_checksum {
            reader.verify_checksum()?;
        }

        Ok(reader)
    }

    fn parse_index(path: &Path, data: &[u8], index_offset: u64) -> Result<BTreeMap<Vec<u8>, u64>> {
        let truncated = || {
            DbError::Corruption(format!("SSTable {} has a truncated index block", path.display()))
        };

        let mut index = BTreeMap::new();
        let mut pos = 0;
        while pos < data.len() {
            if pos + 12 > data.len() {
                return Err(truncated());
            }
            let key_len = read_u32(&data[pos..pos + 4]) as usize;
            let offset = read_u64(&data[pos + 4..pos + 12]);
            pos += 12;

            if pos + key_len > data.len() {
                return Err(truncated());
            }
            if offset < HEADER_SIZE || offset >= index_offset {
                return Err(DbError::Corruption(format!(
                    "SSTable {} index points outside the data block ({})",
                    path.display(),
                    offset
                )));
            }
            index.insert(data[pos..pos + key_len].to_vec(), offset);
            pos += key_len;
        }
        Ok(index)
    }

    /// Get a value by key — O(log n) lookup via in-memory index
    ///
    /// Returns:
    /// - `Ok(Some(value))` — key found with value
    /// - `Ok(None)` — key found but is a tombstone (deleted)
    /// - `Err(KeyNotFound)` — key not in this SSTable
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let offset = match self.index.get(key) {
            Some(&off) => off,
            None => return Err(DbError::KeyNotFound),
        };

        if let Some(cache) = &self.cache {
            if let Some(value) = cache.get(self.id, offset) {
                return Ok(Some(value.to_vec()));
            }
        }

        let value = self.read_entry_at(offset, key)?;

        if let (Some(cache), Some(v)) = (&self.cache, &value) {
            cache.insert(self.id, offset, Bytes::copy_from_slice(v));
        }
        Ok(value)
    }

    /// Read the entry at `offset`, checking that it holds `key`
    fn read_entry_at(&self, offset: u64, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut header = [0u8; 8];
        file.read_exact(&mut header)?;

        let key_len = read_u32(&header[0..4]) as usize;
        let val_len = read_u32(&header[4..8]);

        let mut stored_key = vec![0u8; key_len];
        file.read_exact(&mut stored_key)?;
        if stored_key != key {
            return Err(DbError::Corruption(format!(
                "SSTable {} entry at offset {} does not match its index key",
                self.path.display(),
                offset
            )));
        }

        // Check for tombstone
        if val_len == TOMBSTONE_MARKER {
            return Ok(None);
        }

        if offset + 8 + key_len as u64 + val_len as u64 > self.index_offset {
            return Err(DbError::Corruption(format!(
                "SSTable {} entry at offset {} overruns the data block",
                self.path.display(),
                offset
            )));
        }

        let mut value = vec![0u8; val_len as usize];
        file.read_exact(&mut value)?;

        Ok(Some(value))
    }

    /// First key at or after the lower bound
    pub fn first_key_from(&self, lower: Bound<&[u8]>) -> Option<&[u8]> {
        self.index
            .range::<[u8], _>((lower, Bound::Unbounded))
            .next()
            .map(|(k, _)| k.as_slice())
    }

    /// File offset where the first key >= `key` starts (end of the data
    /// block if there is none)
    pub fn approximate_offset_of(&self, key: &[u8]) -> u64 {
        self.index
            .range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
            .next()
            .map(|(_, &off)| off)
            .unwrap_or(self.index_offset)
    }

    /// Re-read the data block and compare against the footer CRC
    pub fn verify_checksum(&self) -> Result<()> {
        let mut iter = self.iter()?;
        for entry in iter.by_ref() {
            entry?;
        }
        let actual = iter.checksum();
        if actual != self.data_crc {
            return Err(DbError::Corruption(format!(
                "SSTable {} checksum mismatch: footer {:08x}, data {:08x}",
                self.path.display(),
                self.data_crc,
                actual
            )));
        }
        Ok(())
    }

    /// Get entry count
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Table id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Path of the table file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the table file in bytes
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Get the minimum key in this SSTable (for range filtering)
    pub fn min_key(&self) -> Option<&[u8]> {
        self.index.keys().next().map(|k| k.as_slice())
    }

    /// Get the maximum key in this SSTable (for range filtering)
    pub fn max_key(&self) -> Option<&[u8]> {
        self.index.keys().next_back().map(|k| k.as_slice())
    }

    /// Quick check if a key might be in this SSTable (range check)
    /// Returns false only if the key is definitely outside [min_key, max_key]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        match (self.min_key(), self.max_key()) {
            (Some(min), Some(max)) => key >= min && key <= max,
            _ => false, // Empty SSTable
        }
    }

    /// True if any key of this table lies in `[start, end)`
    pub fn overlaps(&self, start: &[u8], end: &[u8]) -> bool {
        if start >= end {
            return false;
        }
        self.index
            .range::<[u8], _>((Bound::Included(start), Bound::Excluded(end)))
            .next()
            .is_some()
    }

    /// Create an iterator over all entries (verification, debugging)
    pub fn iter(&self) -> Result<SSTableIterator<'_>> {
        SSTableIterator::new(self.file.lock(), self.index_offset)
    }

    /// Schedule the file for deletion once no snapshot uses it
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::SeqCst);
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::SeqCst)
    }
}

impl Drop for SSTableReader {
    fn drop(&mut self) {
        if !self.is_obsolete() {
            return;
        }
        if let Some(cache) = &self.cache {
            cache.evict_table(self.id);
        }
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed obsolete SSTable"),
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove obsolete SSTable"),
        }
    }
}
