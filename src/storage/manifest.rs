//! Table manifest
//!
//! Records which SSTables are live. Tables on disk but not listed are
//! leftovers of an interrupted flush or compaction and are removed on open.
//! The file is replaced atomically, so a compaction's new table set becomes
//! visible all at once or not at all.
//!
//! ## Format
//! ```text
//! [Magic "IXMF" (4)][Version u16 (2)][Count u32 (4)][Id u64 (8)]*[CRC u32 (4)]
//! ```
//! The CRC covers everything before it.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{DbError, Result};

use super::sstable::{read_u32, read_u64};

/// File name of the manifest inside the SSTable directory
pub const MANIFEST_FILENAME: &str = "MANIFEST";

const MANIFEST_TEMP: &str = "MANIFEST.tmp";
const MANIFEST_MAGIC: &[u8; 4] = b"IXMF";
const MANIFEST_VERSION: u16 = 1;

/// Live table ids, newest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub tables: Vec<u64>,
}

impl Manifest {
    pub fn new(tables: Vec<u64>) -> Self {
        Self { tables }
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILENAME)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(14 + self.tables.len() * 8);
        buf.extend_from_slice(MANIFEST_MAGIC);
        buf.extend_from_slice(&MANIFEST_VERSION.to_le_bytes());
        buf.extend_from_slice(&(self.tables.len() as u32).to_le_bytes());
        for id in &self.tables {
            buf.extend_from_slice(&id.to_le_bytes());
        }
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let corrupt = |what: &str| DbError::Corruption(format!("Manifest {}", what));

        if data.len() < 14 {
            return Err(corrupt("is too short"));
        }
        let (body, crc) = data.split_at(data.len() - 4);
        if crc32fast::hash(body) != read_u32(crc) {
            return Err(corrupt("checksum mismatch"));
        }
        if &body[0..4] != MANIFEST_MAGIC {
            return Err(corrupt("has invalid magic"));
        }
        let version = u16::from_le_bytes([body[4], body[5]]);
        if version != MANIFEST_VERSION {
            return Err(DbError::Storage(format!(
                "Unsupported manifest version: {}",
                version
            )));
        }

        let count = read_u32(&body[6..10]) as usize;
        let ids = &body[10..];
        if ids.len() != count * 8 {
            return Err(corrupt("table count does not match its length"));
        }
        Ok(Self {
            tables: ids.chunks_exact(8).map(read_u64).collect(),
        })
    }

    /// Load the manifest in `dir`; `None` if there is none yet
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        match fs::read(Self::path(dir)) {
            Ok(data) => Self::decode(&data).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the manifest in `dir`: write a temp file, sync, rename over
    /// the old one, then sync the directory so the rename is durable.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let temp_path = dir.join(MANIFEST_TEMP);

        let mut file = File::create(&temp_path)?;
        file.write_all(&self.encode())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, Self::path(dir))?;
        sync_dir(dir)
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
