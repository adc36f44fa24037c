//! Partitions
//!
//! Each data type lives in its own partition: a segment log, an index and the
//! locks that serialize access to them. Partitions share nothing, so recovery
//! and merge run independently per partition.

use std::fmt;
use std::path::Path;

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Result;
use crate::index::{Location, PartitionIndex};
use crate::log::{now_millis, Entry, SegmentLog};
use crate::merge;
use crate::recovery::{Recovery, RecoveryReport};

/// Logical data types, one partition each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    String = 1,
    List = 2,
    Hash = 3,
    Set = 4,
    SortedSet = 5,
}

impl DataType {
    /// Every partition, in directory order
    pub const ALL: [DataType; 5] = [
        DataType::String,
        DataType::List,
        DataType::Hash,
        DataType::Set,
        DataType::SortedSet,
    ];

    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(DataType::String),
            2 => Some(DataType::List),
            3 => Some(DataType::Hash),
            4 => Some(DataType::Set),
            5 => Some(DataType::SortedSet),
            _ => None,
        }
    }

    /// Directory name of the partition under the data directory
    pub fn dir_name(self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::List => "list",
            DataType::Hash => "hash",
            DataType::Set => "set",
            DataType::SortedSet => "zset",
        }
    }

    /// Whether keys of this type hold members (everything but strings)
    pub fn is_collection(self) -> bool {
        self != DataType::String
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Space accounting of one partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartitionStats {
    pub segments: usize,
    /// Bytes across all segments
    pub total_bytes: u64,
    /// Bytes of records the index still references
    pub live_bytes: u64,
    /// `total_bytes - live_bytes`: what a merge would free
    pub reclaimable_bytes: u64,
    /// Live string keys or collection members
    pub live_entries: usize,
}

impl PartitionStats {
    /// Reclaimable share of the partition, 0.0 when empty
    pub fn reclaimable_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            self.reclaimable_bytes as f64 / self.total_bytes as f64
        }
    }
}

/// Log and index of a partition, always accessed together
pub struct PartitionState {
    pub log: SegmentLog,
    pub index: PartitionIndex,
}

impl PartitionState {
    /// Append `entry` and apply it to the index
    ///
    /// The index only changes once the append succeeded.
    pub fn append(&mut self, entry: &Entry) -> Result<Location> {
        let location = self.log.append_active(entry)?;
        self.index.apply(entry, location);
        tracing::trace!(
            "Appended {:?} for {} partition at {:?}",
            entry.kind,
            entry.data_type,
            location
        );
        Ok(location)
    }

    pub fn stats(&self, now: u64) -> PartitionStats {
        let total_bytes = self.log.total_size();
        let live_bytes = self.index.live_bytes();
        PartitionStats {
            segments: self.log.segment_count(),
            total_bytes,
            live_bytes,
            reclaimable_bytes: total_bytes.saturating_sub(live_bytes),
            live_entries: self.index.count(now),
        }
    }
}

/// One data-type partition
///
/// ## Concurrency:
/// - `write_gate`: serializes everything that appends (writes and merge).
///   Merge keeps it for its whole run, so writers wait while readers go on.
/// - `state`: readers share it; appends and index swaps take it exclusively
///   and only while already holding the gate.
pub struct Partition {
    data_type: DataType,
    write_gate: Mutex<()>,
    state: RwLock<PartitionState>,
}

impl Partition {
    /// Open the partition under `root`, finishing an interrupted merge and
    /// replaying the log
    pub fn open(root: &Path, data_type: DataType, config: &Config) -> Result<(Self, RecoveryReport)> {
        let dir = root.join(data_type.dir_name());
        std::fs::create_dir_all(&dir)?;

        merge::resume(&dir)?;

        let mut log = SegmentLog::open(&dir, config)?;
        let mut index = PartitionIndex::new(data_type);
        let report = Recovery::replay(&mut log, &mut index, now_millis())?;

        tracing::info!(
            "Opened {} partition: {} segments, {} entries replayed, {} live",
            data_type,
            report.segments_scanned,
            report.entries_replayed,
            index.count(now_millis())
        );

        let partition = Self {
            data_type,
            write_gate: Mutex::new(()),
            state: RwLock::new(PartitionState { log, index }),
        };
        Ok((partition, report))
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Shared access for lookups and log reads
    pub fn read(&self) -> RwLockReadGuard<'_, PartitionState> {
        self.state.read()
    }

    /// Run `f` with exclusive access, serialized with other writers and merge
    pub fn write<R>(&self, f: impl FnOnce(&mut PartitionState) -> Result<R>) -> Result<R> {
        let _gate = self.write_gate.lock();
        let mut state = self.state.write();
        f(&mut state)
    }

    /// Hold off writers without blocking readers (merge)
    pub(crate) fn gate(&self) -> MutexGuard<'_, ()> {
        self.write_gate.lock()
    }

    /// Exclusive access for a caller that already holds the gate (merge)
    pub(crate) fn state_mut(&self) -> RwLockWriteGuard<'_, PartitionState> {
        self.state.write()
    }

    /// Drop an expired key or member a read ran into
    ///
    /// Best effort: skipped when the state is busy, the next read or merge
    /// catches it.
    pub fn remove_expired(&self, key: &[u8], member: &[u8], now: u64) {
        if let Some(mut state) = self.state.try_write() {
            if state.index.remove_expired(key, member, now) {
                tracing::trace!("Lazily removed expired entry from {} partition", self.data_type);
            }
        }
    }

    pub fn stats(&self) -> PartitionStats {
        self.state.read().stats(now_millis())
    }
}
