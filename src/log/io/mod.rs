//! Segment I/O backends
//!
//! A segment file is seen by the rest of the engine as a byte-addressable
//! append target plus a random-access reader. Two interchangeable
//! implementations exist, selected by [`IoMode`] at open time:
//!
//! - [`BufferedFile`]: writes collect in a process-level buffer that is
//!   flushed when it fills up or on `sync`.
//! - [`MmapFile`]: the file is mapped and writes go straight into the mapping;
//!   `sync` flushes the mapping to stable storage.

mod buffered;
mod mmap;

use std::path::Path;

use crate::config::IoMode;
use crate::error::Result;

pub use buffered::BufferedFile;
pub use mmap::MmapFile;

/// Byte-level contract every segment backend honours
pub trait IoBackend: Send + Sync {
    /// Append `buf`, returning the logical offset it was written at
    fn append(&mut self, buf: &[u8]) -> Result<u64>;

    /// Read exactly `len` bytes starting at `offset`
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Force everything appended so far to stable storage
    fn sync(&mut self) -> Result<()>;

    /// Logical length in bytes
    fn size(&self) -> u64;

    /// Drop everything past `len` (used by recovery to cut a bad tail)
    fn truncate(&mut self, len: u64) -> Result<()>;

    /// Flush and shrink the file to its logical length; no appends follow
    fn seal(&mut self) -> Result<()>;
}

/// Open (or create) a segment file with the chosen backend
///
/// `capacity` is the rotation threshold; the mmap backend preallocates it for
/// writable segments.
pub fn open_backend(
    path: &Path,
    mode: IoMode,
    capacity: u64,
    writable: bool,
) -> Result<Box<dyn IoBackend>> {
    match mode {
        IoMode::Buffered => Ok(Box::new(BufferedFile::open(path)?)),
        IoMode::Mmap => Ok(Box::new(MmapFile::open(path, capacity, writable)?)),
    }
}
