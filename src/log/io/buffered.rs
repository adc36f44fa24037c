//! Buffered file backend

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;

use crate::error::Result;

use super::IoBackend;

/// Pending bytes are written out once the buffer reaches this size
const BUFFER_CAPACITY: usize = 64 * 1024;

/// Segment file accessed through a write buffer
///
/// Appends land in `pending` and are written out as a whole, so a record is
/// either entirely in the buffer or entirely in the file. Reads below
/// `flushed` go to the file, reads above it are served from the buffer.
pub struct BufferedFile {
    /// Append handle
    writer: File,
    /// Separate handle for positional reads (own cursor)
    reader: Mutex<File>,
    /// Bytes appended but not yet written to the file
    pending: Vec<u8>,
    /// Bytes already handed to the OS
    flushed: u64,
}

impl BufferedFile {
    pub fn open(path: &Path) -> Result<Self> {
        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        let reader = File::open(path)?;
        let flushed = writer.metadata()?.len();

        Ok(Self {
            writer,
            reader: Mutex::new(reader),
            pending: Vec::with_capacity(BUFFER_CAPACITY),
            flushed,
        })
    }

    /// Write the pending bytes out
    ///
    /// On failure the file is cut back to `flushed` so a partial write leaves
    /// no stray bytes, and `pending` is kept for the next attempt.
    fn flush_pending(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.writer.write_all(&self.pending) {
            if let Err(cut) = self.writer.set_len(self.flushed) {
                tracing::error!(
                    "Failed to cut segment back to {} bytes after a failed write: {}",
                    self.flushed,
                    cut
                );
            }
            return Err(e.into());
        }
        self.flushed += self.pending.len() as u64;
        self.pending.clear();
        Ok(())
    }
}

impl IoBackend for BufferedFile {
    fn append(&mut self, buf: &[u8]) -> Result<u64> {
        let offset = self.size();
        let before = self.pending.len();
        self.pending.extend_from_slice(buf);
        if self.pending.len() >= BUFFER_CAPACITY {
            if let Err(e) = self.flush_pending() {
                // The caller never sees this record's offset
                self.pending.truncate(before);
                return Err(e);
            }
        }
        Ok(offset)
    }

    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let end = offset + len as u64;
        if end > self.size() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read of {}..{} past end {}", offset, end, self.size()),
            )
            .into());
        }

        if offset >= self.flushed {
            let start = (offset - self.flushed) as usize;
            return Ok(self.pending[start..start + len].to_vec());
        }

        // Part (or all) of the range is in the file, the rest still pending
        let in_file = (end.min(self.flushed) - offset) as usize;
        let mut buf = vec![0u8; in_file];
        {
            let mut reader = self.reader.lock();
            reader.seek(SeekFrom::Start(offset))?;
            reader.read_exact(&mut buf)?;
        }
        buf.extend_from_slice(&self.pending[..len - in_file]);
        Ok(buf)
    }

    fn sync(&mut self) -> Result<()> {
        self.flush_pending()?;
        self.writer.sync_data()?;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.flushed + self.pending.len() as u64
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        self.flush_pending()?;
        self.writer.set_len(len)?;
        self.writer.sync_all()?;
        self.flushed = len;
        Ok(())
    }

    fn seal(&mut self) -> Result<()> {
        self.flush_pending()?;
        self.writer.sync_all()?;
        Ok(())
    }
}

impl Drop for BufferedFile {
    fn drop(&mut self) {
        if let Err(e) = self.flush_pending() {
            tracing::warn!("Failed to flush segment buffer on drop: {}", e);
        }
    }
}
