//! Segment Log Module
//!
//! Append-only storage shared by every partition.
//!
//! ## Responsibilities
//! - Encode records with a length prefix and CRC32 checksum
//! - Append to the active segment, rotating at the size threshold
//! - Random-access reads by [`Location`]
//! - Ordered iteration for recovery and merge
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/{partition}/
//!   ├── 000000001.seg      (sealed)
//!   ├── 000000002.seg      (sealed)
//!   ├── 000000003.seg      (active: highest id)
//!   ├── MERGE_MANIFEST     (only while a merge commits)
//!   └── merge/             (only while a merge runs)
//! ```
//!
//! ## Segment Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Record 1                                │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ Len (4) │ CRC (4) │ Header │  Data  │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Record 2 ...                            │
//! └─────────────────────────────────────────┘
//! ```

mod codec;
mod entry;
pub mod io;
mod iterator;
mod manager;
mod segment;

pub use codec::{decode, decode_prefix, encode, encoded_len, CodecError, HEADER_SIZE, PREFIX_SIZE};
pub use entry::{now_millis, Entry, EntryKind};
pub use iterator::{LogItem, LogIterator};
pub use manager::SegmentLog;
pub use segment::{parse_segment_id, segment_path, Probe, Segment};

/// Where a record lives: (segment id, byte offset, encoded length)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    pub segment_id: u32,
    pub offset: u64,
    pub len: u32,
}
