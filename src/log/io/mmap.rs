//! Memory-mapped file backend

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use memmap2::MmapMut;

use crate::error::Result;

use super::IoBackend;

/// Segment file mapped into the address space
///
/// Writable segments are preallocated to `capacity` so appends never remap.
/// `len` is the logical end; bytes past it are zero (or a stale tail that
/// recovery zeroes through `truncate`).
pub struct MmapFile {
    file: File,
    /// `None` for empty files, which cannot be mapped
    map: Option<MmapMut>,
    len: u64,
    capacity: u64,
}

impl MmapFile {
    pub fn open(path: &Path, capacity: u64, writable: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        let file_len = file.metadata()?.len();
        let capacity = if writable {
            if file_len < capacity {
                file.set_len(capacity)?;
            }
            file_len.max(capacity)
        } else {
            file_len
        };

        let map = Self::map(&file, capacity)?;

        Ok(Self {
            file,
            map,
            len: file_len,
            capacity,
        })
    }

    fn map(file: &File, len: u64) -> Result<Option<MmapMut>> {
        if len == 0 {
            return Ok(None);
        }
        // SAFETY: the segment file is owned by this process for the lifetime
        // of the engine; nothing else resizes or writes it while mapped.
        let map = unsafe { MmapMut::map_mut(file)? };
        Ok(Some(map))
    }
}

impl IoBackend for MmapFile {
    fn append(&mut self, buf: &[u8]) -> Result<u64> {
        let offset = self.len;
        let end = offset + buf.len() as u64;
        if end > self.capacity {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("mapped segment full: {} + {} > {}", offset, buf.len(), self.capacity),
            )
            .into());
        }

        if let Some(map) = self.map.as_mut() {
            map[offset as usize..end as usize].copy_from_slice(buf);
        }
        self.len = end;
        Ok(offset)
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let end = offset + len as u64;
        match self.map.as_ref() {
            Some(map) if end <= self.len => Ok(map[offset as usize..end as usize].to_vec()),
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read of {}..{} past end {}", offset, end, self.len),
            )
            .into()),
        }
    }

    fn sync(&mut self) -> Result<()> {
        if let Some(map) = self.map.as_ref() {
            map.flush()?;
        }
        Ok(())
    }

    fn size(&self) -> u64 {
        self.len
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        if len >= self.len {
            return Ok(());
        }
        if let Some(map) = self.map.as_mut() {
            map[len as usize..self.len as usize].fill(0);
            map.flush()?;
        }
        self.len = len;
        Ok(())
    }

    fn seal(&mut self) -> Result<()> {
        if let Some(map) = self.map.take() {
            map.flush()?;
        }
        self.file.set_len(self.len)?;
        self.file.sync_all()?;
        self.capacity = self.len;
        self.map = Self::map(&self.file, self.len)?;
        Ok(())
    }
}
