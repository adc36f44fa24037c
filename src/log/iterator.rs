//! Log Iterator
//!
//! Sequential iteration over the records of one or more segments, ascending by
//! (segment id, offset). Used by recovery and merge.

use crate::error::{BrambleError, Result};

use super::segment::Probe;
use super::{Entry, Location, SegmentLog};

/// One step of a log scan
#[derive(Debug)]
pub enum LogItem {
    /// A decoded record and where it lives
    Entry { location: Location, entry: Entry },

    /// The scan of a segment finished
    ///
    /// `valid_len < size` means the tail past `valid_len` holds no usable
    /// records; `corruption` says why when it was not just zero padding.
    SegmentEnd {
        segment_id: u32,
        valid_len: u64,
        size: u64,
        corruption: Option<String>,
    },
}

/// Iterator over records in segment order
///
/// Finite and not restartable; ask the log for a new one to start over.
pub struct LogIterator<'a> {
    log: &'a SegmentLog,
    /// Segment ids still to visit, ascending
    ids: Vec<u32>,
    /// Index into `ids` of the segment being read
    current: usize,
    /// Next offset to read in the current segment
    offset: u64,
}

impl<'a> LogIterator<'a> {
    pub(super) fn new(log: &'a SegmentLog, mut ids: Vec<u32>) -> Self {
        ids.sort_unstable();
        Self {
            log,
            ids,
            current: 0,
            offset: 0,
        }
    }

    fn finish_segment(&mut self, segment_id: u32, size: u64, corruption: Option<String>) -> LogItem {
        let valid_len = self.offset;
        self.current += 1;
        self.offset = 0;
        LogItem::SegmentEnd {
            segment_id,
            valid_len,
            size,
            corruption,
        }
    }
}

impl<'a> Iterator for LogIterator<'a> {
    type Item = Result<LogItem>;

    fn next(&mut self) -> Option<Self::Item> {
        let segment_id = *self.ids.get(self.current)?;
        let segment = match self.log.segment(segment_id) {
            Some(segment) => segment,
            None => {
                self.current += 1;
                return Some(Err(BrambleError::SegmentNotFound(segment_id)));
            }
        };
        let size = segment.size();

        match segment.probe(self.offset) {
            Ok(Probe::Entry(entry, len)) => {
                let location = Location {
                    segment_id,
                    offset: self.offset,
                    len,
                };
                self.offset += len as u64;
                Some(Ok(LogItem::Entry { location, entry }))
            }
            Ok(Probe::End) => Some(Ok(self.finish_segment(segment_id, size, None))),
            Ok(Probe::Corrupt(reason)) => {
                Some(Ok(self.finish_segment(segment_id, size, Some(reason))))
            }
            Err(e) => {
                // Give up on this segment; the caller decides what to do
                self.current += 1;
                self.offset = 0;
                Some(Err(e))
            }
        }
    }
}
