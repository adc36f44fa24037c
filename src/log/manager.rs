//! Segment Log
//!
//! Owns the ordered collection of segments for one partition.
//!
//! ## Responsibilities
//! - Discover existing segment files on startup
//! - Append records to the active segment, rotating when it would overflow
//! - Resolve locations to records in any segment
//! - Delete retired segments after a merge

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::config::{Config, IoMode, SyncStrategy};
use crate::error::{BrambleError, Result};

use super::codec;
use super::iterator::LogIterator;
use super::segment::{parse_segment_id, Segment};
use super::{Entry, Location};

/// Append-only log of one partition
///
/// ## Concurrency:
/// - Appends, rotation and retirement need `&mut self`; the owning partition
///   serializes them behind its write lock.
/// - Reads only need `&self`, so any number of readers can resolve locations
///   in parallel.
/// - `next_id`: atomic counter, so a merge can reserve ids while holding only
///   a shared borrow.
pub struct SegmentLog {
    /// Partition directory holding the segment files
    dir: PathBuf,

    /// Backend used for every segment of this log
    mode: IoMode,

    /// Rotation threshold in bytes
    segment_size: u64,

    sync_strategy: SyncStrategy,

    /// Read-only segments by id
    sealed: BTreeMap<u32, Segment>,

    /// Segment accepting appends; opened lazily on first write
    active: Option<Segment>,

    /// Next id to hand out (never reused)
    next_id: AtomicU32,

    /// Appends since the last sync
    unsynced: usize,
}

impl SegmentLog {
    /// Open or create the log in `dir`
    ///
    /// On startup:
    /// 1. Create directory if it doesn't exist
    /// 2. Discover existing segment files
    /// 3. Open the highest id as the active segment, the rest sealed
    pub fn open(dir: &Path, config: &Config) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let mut ids: Vec<u32> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() {
                if let Some(id) = parse_segment_id(&path) {
                    ids.push(id);
                }
            }
        }
        ids.sort_unstable();

        let mut sealed = BTreeMap::new();
        let mut active = None;
        if let Some((&last, rest)) = ids.split_last() {
            for &id in rest {
                let segment = Segment::open(dir, id, config.io_mode, config.segment_size, false)?;
                sealed.insert(id, segment);
            }
            active = Some(Segment::open(
                dir,
                last,
                config.io_mode,
                config.segment_size,
                true,
            )?);
        }

        // Next ID = max + 1, or 1 if no segments exist
        let next_id = ids.last().map(|&id| id + 1).unwrap_or(1);

        Ok(Self {
            dir: dir.to_path_buf(),
            mode: config.io_mode,
            segment_size: config.segment_size,
            sync_strategy: config.sync_strategy,
            sealed,
            active,
            next_id: AtomicU32::new(next_id),
            unsynced: 0,
        })
    }

    /// Encode and append `entry` to the active segment
    ///
    /// Seals the active segment first if the record would push it past the
    /// rotation threshold.
    pub fn append_active(&mut self, entry: &Entry) -> Result<Location> {
        let bytes = codec::encode(entry);
        let len = bytes.len() as u64;
        if len > self.segment_size {
            return Err(BrambleError::EntryTooLarge {
                size: len,
                max: self.segment_size,
            });
        }

        let needs_rotation = match &self.active {
            Some(active) => active.size() + len > self.segment_size,
            None => true,
        };
        if needs_rotation {
            self.rotate()?;
        }

        let active = match self.active.as_mut() {
            Some(active) => active,
            None => return Err(BrambleError::InvalidArgument("no active segment".into())),
        };
        let offset = active.append(&bytes)?;
        let location = Location {
            segment_id: active.id(),
            offset,
            len: len as u32,
        };

        self.unsynced += 1;
        match self.sync_strategy {
            SyncStrategy::EveryWrite => self.sync()?,
            SyncStrategy::EveryNEntries { count } if self.unsynced >= count => self.sync()?,
            _ => {}
        }

        Ok(location)
    }

    /// Read the record a location points at
    pub fn read(&self, location: Location) -> Result<Entry> {
        let segment = self
            .segment(location.segment_id)
            .ok_or(BrambleError::SegmentNotFound(location.segment_id))?;
        segment.read_entry(location.offset, location.len)
    }

    /// Every record of every segment, oldest first
    pub fn iter_all(&self) -> LogIterator<'_> {
        LogIterator::new(self, self.segment_ids())
    }

    /// Records of the given segments, oldest first
    pub fn iter_segments(&self, ids: &[u32]) -> LogIterator<'_> {
        LogIterator::new(self, ids.to_vec())
    }

    /// Seal the active segment (if any); the next append opens a new one
    ///
    /// Returns the id of the segment that was sealed.
    pub fn seal_active(&mut self) -> Result<Option<u32>> {
        let mut segment = match self.active.take() {
            Some(segment) => segment,
            None => return Ok(None),
        };
        if let Err(e) = segment.seal() {
            self.active = Some(segment);
            return Err(e);
        }
        self.unsynced = 0;

        let id = segment.id();
        tracing::debug!("Sealed segment {} ({} bytes) in {}", id, segment.size(), self.dir.display());
        self.sealed.insert(id, segment);
        Ok(Some(id))
    }

    /// Force the active segment to durable storage
    pub fn sync(&mut self) -> Result<()> {
        if let Some(active) = self.active.as_mut() {
            active.sync()?;
        }
        self.unsynced = 0;
        Ok(())
    }

    /// Delete sealed segments
    ///
    /// Only legal once nothing in the index points into them any more. Every
    /// segment leaves the log even if deleting its file fails; the first such
    /// failure is returned.
    pub fn retire(&mut self, ids: &[u32]) -> Result<()> {
        let mut failure = None;
        for id in ids {
            if let Some(segment) = self.sealed.remove(id) {
                let path = segment.path().to_path_buf();
                drop(segment);
                match fs::remove_file(&path) {
                    Ok(()) => tracing::debug!("Retired segment {}", path.display()),
                    Err(e) => {
                        tracing::warn!("Failed to delete retired segment {}: {}", path.display(), e);
                        failure.get_or_insert(e);
                    }
                }
            }
        }
        match failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Cut segment `id` at `len` bytes (recovery only)
    pub fn truncate_segment(&mut self, id: u32, len: u64) -> Result<()> {
        let segment = match self.active.as_mut() {
            Some(active) if active.id() == id => active,
            _ => self
                .sealed
                .get_mut(&id)
                .ok_or(BrambleError::SegmentNotFound(id))?,
        };
        segment.truncate(len)
    }

    /// Reserve a fresh segment id
    pub fn allocate_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register finished segment files already placed in the log directory
    ///
    /// All or nothing: if any of them fails to open, none is registered.
    pub fn install(&mut self, ids: &[u32]) -> Result<()> {
        let mut opened = Vec::with_capacity(ids.len());
        for &id in ids {
            opened.push(Segment::open(&self.dir, id, self.mode, self.segment_size, false)?);
        }
        for segment in opened {
            self.sealed.insert(segment.id(), segment);
        }
        Ok(())
    }

    /// Sync and seal the active segment
    pub fn close(&mut self) -> Result<()> {
        self.sync()?;
        self.seal_active()?;
        Ok(())
    }

    /// Close the current active segment and open a fresh one
    fn rotate(&mut self) -> Result<()> {
        self.seal_active()?;
        let id = self.allocate_id();
        let segment = Segment::open(&self.dir, id, self.mode, self.segment_size, true)?;
        tracing::debug!("Opened active segment {} in {}", id, self.dir.display());
        self.active = Some(segment);
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub(crate) fn segment(&self, id: u32) -> Option<&Segment> {
        match &self.active {
            Some(active) if active.id() == id => Some(active),
            _ => self.sealed.get(&id),
        }
    }

    /// All segment ids, ascending
    pub fn segment_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.sealed.keys().copied().collect();
        if let Some(active) = &self.active {
            ids.push(active.id());
        }
        ids
    }

    /// Sealed segment ids, ascending
    pub fn sealed_ids(&self) -> Vec<u32> {
        self.sealed.keys().copied().collect()
    }

    pub fn active_id(&self) -> Option<u32> {
        self.active.as_ref().map(|s| s.id())
    }

    pub fn segment_count(&self) -> usize {
        self.sealed.len() + usize::from(self.active.is_some())
    }

    /// Sum of the logical sizes of all segments
    pub fn total_size(&self) -> u64 {
        self.sealed.values().map(|s| s.size()).sum::<u64>()
            + self.active.as_ref().map_or(0, |s| s.size())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn segment_size(&self) -> u64 {
        self.segment_size
    }

    /// Get the next segment id (for testing/debugging)
    pub fn next_id(&self) -> u32 {
        self.next_id.load(Ordering::SeqCst)
    }
}
