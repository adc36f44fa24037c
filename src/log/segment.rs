//! Segment files
//!
//! One append-only file of records, identified by a numeric id.

use std::path::{Path, PathBuf};

use crate::config::IoMode;
use crate::error::{BrambleError, Result};

use super::codec::{self, PREFIX_SIZE};
use super::io::{open_backend, IoBackend};
use super::Entry;

/// Segment file extension
pub(crate) const SEGMENT_EXT: &str = "seg";

/// Outcome of probing the record that starts at some offset
#[derive(Debug)]
pub enum Probe {
    /// A valid record and its encoded length
    Entry(Entry, u32),
    /// No more records: end of file or the zero end-of-data marker
    End,
    /// The bytes at this offset are not a valid record
    Corrupt(String),
}

/// An append-only segment file
pub struct Segment {
    id: u32,
    path: PathBuf,
    backend: Box<dyn IoBackend>,
    sealed: bool,
}

impl Segment {
    /// Create or reopen a segment file
    ///
    /// Writable segments accept appends until sealed.
    pub fn open(dir: &Path, id: u32, mode: IoMode, capacity: u64, writable: bool) -> Result<Self> {
        let path = segment_path(dir, id);
        let backend = open_backend(&path, mode, capacity, writable)?;
        Ok(Self {
            id,
            path,
            backend,
            sealed: !writable,
        })
    }

    /// Append encoded bytes, returning their offset
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        if self.sealed {
            return Err(BrambleError::InvalidArgument(format!(
                "segment {} is sealed",
                self.id
            )));
        }
        self.backend.append(bytes)
    }

    /// Read and decode the record at `offset`
    pub fn read_entry(&self, offset: u64, len: u32) -> Result<Entry> {
        let bytes = self.backend.read_at(offset, len as usize)?;
        codec::decode(&bytes).map_err(|e| BrambleError::CorruptEntry {
            segment_id: self.id,
            offset,
            reason: e.to_string(),
        })
    }

    /// Look at the record starting at `offset` without trusting it
    pub fn probe(&self, offset: u64) -> Result<Probe> {
        let size = self.size();
        if offset >= size {
            return Ok(Probe::End);
        }

        let remaining = size - offset;
        if remaining < PREFIX_SIZE as u64 {
            let tail = self.backend.read_at(offset, remaining as usize)?;
            if tail.iter().all(|&b| b == 0) {
                return Ok(Probe::End);
            }
            return Ok(Probe::Corrupt(format!("{} stray tail bytes", remaining)));
        }

        let prefix = self.backend.read_at(offset, PREFIX_SIZE)?;
        let total_len = match codec::decode_prefix(&prefix) {
            Ok(Some((total_len, _))) => total_len,
            Ok(None) => return Ok(Probe::End),
            Err(e) => return Ok(Probe::Corrupt(e.to_string())),
        };

        if total_len as u64 > remaining {
            return Ok(Probe::Corrupt(format!(
                "record of {} bytes exceeds the {} bytes left",
                total_len, remaining
            )));
        }

        let bytes = self.backend.read_at(offset, total_len as usize)?;
        match codec::decode(&bytes) {
            Ok(entry) => Ok(Probe::Entry(entry, total_len)),
            Err(e) => Ok(Probe::Corrupt(e.to_string())),
        }
    }

    /// Flush buffered appends to durable storage
    pub fn sync(&mut self) -> Result<()> {
        self.backend.sync()
    }

    /// Stop accepting appends; flushes and trims the file
    pub fn seal(&mut self) -> Result<()> {
        if self.sealed {
            return Ok(());
        }
        self.backend.seal()?;
        self.sealed = true;
        Ok(())
    }

    /// Cut the segment at `len` bytes
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.backend.truncate(len)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.backend.size()
    }
}

/// File path for segment `id` inside `dir`
/// 42 → "{dir}/000000042.seg"
pub fn segment_path(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("{:09}.{}", id, SEGMENT_EXT))
}

/// Parse a segment id from its filename
/// "000000042.seg" → Some(42)
pub fn parse_segment_id(path: &Path) -> Option<u32> {
    if path.extension()? != SEGMENT_EXT {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}
