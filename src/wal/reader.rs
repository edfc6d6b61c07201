//! WAL Reader
//!
//! Handles reading entries from the WAL file. The file is loaded into
//! memory once and walked frame by frame.

use std::fs;
use std::path::Path;

use crate::error::{DbError, Result};

use super::entry::Frame;
use super::WalEntry;

/// Reads entries from the WAL file
pub struct WalReader {
    data: Vec<u8>,
    position: usize,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        Ok(Self { data, position: 0 })
    }

    /// Parse the frame at the current position and step past it if complete
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.position >= self.data.len() {
            return Ok(None);
        }
        let frame = WalEntry::decode_frame(&self.data[self.position..])?;
        if let Frame::Complete(_, len) = &frame {
            self.position += len;
        }
        Ok(Some(frame))
    }

    /// Read the next entry from the WAL.
    ///
    /// Returns `Ok(None)` at the end of the file or at a torn tail; a
    /// checksum mismatch is reported as corruption.
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        match self.next_frame()? {
            None | Some(Frame::Incomplete) => Ok(None),
            Some(Frame::Complete(entry, _)) => Ok(Some(entry)),
            Some(Frame::BadChecksum { lsn }) => Err(DbError::Corruption(format!(
                "WAL checksum mismatch at LSN {} (offset {})",
                lsn, self.position
            ))),
        }
    }

    /// Byte offset just past the last complete entry read so far
    pub fn position(&self) -> usize {
        self.position
    }

    /// Total length of the file
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate over all valid entries
    pub fn entries(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }
}

/// Iterator over WAL entries; stops after the first error
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
