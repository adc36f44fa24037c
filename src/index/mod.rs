//! Index Module
//!
//! In-memory maps from logical keys (and members) to record locations.
//!
//! ## Responsibilities
//! - One native structure per partition, one uniform location contract
//! - Replay-safe `apply`: the live write path and recovery share it
//! - Expiry checks at read time, eviction at recovery and merge time
//! - Live-byte accounting for the merge trigger
//!
//! ## Data Structure Choice
//! - String: `BTreeMap` (ordered, supports range and prefix scans)
//! - List: `VecDeque` per key
//! - Hash and Set: member map per key
//! - Sorted set: member → score map plus a `BTreeSet` ordered by (score, member)
//!
//! The index is a derived cache; segments are the source of truth.

mod expiry;
mod list;
mod members;
mod string;
mod zset;

use std::collections::{HashMap, HashSet};
use std::ops::Bound;

use crate::log::Entry;
use crate::partition::DataType;

pub use crate::log::Location;
pub use expiry::KeyExpiry;
pub use list::ListIndex;
pub use members::MemberIndex;
pub use string::StringIndex;
pub use zset::{decode_score, encode_score, Score, ZSetIndex};

/// Old location → new location, produced by a merge
pub type Remap = HashMap<Location, Location>;

/// Index record for one key or member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub location: Location,
    /// Absolute deadline (unix millis), 0 = never
    pub expires_at: u64,
}

impl IndexEntry {
    pub fn new(location: Location, expires_at: u64) -> Self {
        Self {
            location,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at != 0 && self.expires_at <= now
    }

    pub(crate) fn relocate(&mut self, remap: &Remap) {
        if let Some(&moved) = remap.get(&self.location) {
            self.location = moved;
        }
    }
}

/// Result of an index lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Found(IndexEntry),
    /// Present but past its deadline
    Expired,
    Missing,
}

/// Existence and deadline of a whole key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// Live key; `expires_at == 0` means no deadline
    Live { expires_at: u64 },
    Expired,
    Missing,
}

/// Which keys a scan visits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanRange {
    All,
    Prefix(Vec<u8>),
    Range {
        start: Bound<Vec<u8>>,
        end: Bound<Vec<u8>>,
    },
}

impl ScanRange {
    pub fn contains(&self, key: &[u8]) -> bool {
        match self {
            ScanRange::All => true,
            ScanRange::Prefix(prefix) => key.starts_with(prefix),
            ScanRange::Range { start, end } => {
                let after_start = match start {
                    Bound::Included(s) => key >= s.as_slice(),
                    Bound::Excluded(s) => key > s.as_slice(),
                    Bound::Unbounded => true,
                };
                let before_end = match end {
                    Bound::Included(e) => key <= e.as_slice(),
                    Bound::Excluded(e) => key < e.as_slice(),
                    Bound::Unbounded => true,
                };
                after_start && before_end
            }
        }
    }
}

/// Something a lazy scan resolves later, through the index at that time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanTarget {
    /// A string key
    Key(Vec<u8>),
    /// A hash field, set element or sorted-set member
    Member { key: Vec<u8>, member: Vec<u8> },
    /// A list element by rank within one generation of the list
    Element {
        key: Vec<u8>,
        generation: u64,
        rank: i64,
    },
}

/// The index of one partition
pub enum PartitionIndex {
    String(StringIndex),
    List(ListIndex),
    Hash(MemberIndex),
    Set(MemberIndex),
    SortedSet(ZSetIndex),
}

macro_rules! dispatch {
    ($self:expr, $index:ident => $body:expr) => {
        match $self {
            PartitionIndex::String($index) => $body,
            PartitionIndex::List($index) => $body,
            PartitionIndex::Hash($index) => $body,
            PartitionIndex::Set($index) => $body,
            PartitionIndex::SortedSet($index) => $body,
        }
    };
}

impl PartitionIndex {
    /// Empty index for a partition
    pub fn new(data_type: DataType) -> Self {
        match data_type {
            DataType::String => PartitionIndex::String(StringIndex::default()),
            DataType::List => PartitionIndex::List(ListIndex::default()),
            DataType::Hash => PartitionIndex::Hash(MemberIndex::default()),
            DataType::Set => PartitionIndex::Set(MemberIndex::default()),
            DataType::SortedSet => PartitionIndex::SortedSet(ZSetIndex::default()),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            PartitionIndex::String(_) => DataType::String,
            PartitionIndex::List(_) => DataType::List,
            PartitionIndex::Hash(_) => DataType::Hash,
            PartitionIndex::Set(_) => DataType::Set,
            PartitionIndex::SortedSet(_) => DataType::SortedSet,
        }
    }

    /// Apply the effect of a record stored at `location`
    ///
    /// Records of another partition or with a kind this partition does not
    /// understand leave the index untouched.
    pub fn apply(&mut self, entry: &Entry, location: Location) {
        if entry.data_type != self.data_type() {
            return;
        }
        dispatch!(self, index => index.apply(entry, location))
    }

    /// Look up a key (string) or a member (hash, set, sorted set)
    pub fn get(&self, key: &[u8], member: &[u8], now: u64) -> Lookup {
        match self {
            PartitionIndex::String(index) => index.get(key, now),
            PartitionIndex::Hash(index) | PartitionIndex::Set(index) => index.get(key, member, now),
            PartitionIndex::SortedSet(index) => index.get(key, member, now),
            PartitionIndex::List(_) => Lookup::Missing,
        }
    }

    /// Resolve a scan target against the current state
    pub fn resolve(&self, target: &ScanTarget, now: u64) -> Lookup {
        match (self, target) {
            (PartitionIndex::String(index), ScanTarget::Key(key)) => index.get(key, now),
            (
                PartitionIndex::List(index),
                ScanTarget::Element {
                    key,
                    generation,
                    rank,
                },
            ) => index.get_by_rank(key, *generation, *rank, now),
            (_, ScanTarget::Member { key, member }) => self.get(key, member, now),
            _ => Lookup::Missing,
        }
    }

    /// Whole-key existence and deadline
    pub fn key_state(&self, key: &[u8], now: u64) -> KeyState {
        dispatch!(self, index => index.key_state(key, now))
    }

    /// Drop an expired key or member found by a read
    ///
    /// Returns true if something was removed.
    pub fn remove_expired(&mut self, key: &[u8], member: &[u8], now: u64) -> bool {
        match self {
            PartitionIndex::String(index) => index.remove_expired(key, now),
            PartitionIndex::List(index) => index.remove_expired(key, now),
            PartitionIndex::Hash(index) | PartitionIndex::Set(index) => {
                index.remove_expired(key, member, now)
            }
            PartitionIndex::SortedSet(index) => index.remove_expired(key, member, now),
        }
    }

    /// Drop everything past its deadline; returns how many index records went
    pub fn evict_expired(&mut self, now: u64) -> usize {
        dispatch!(self, index => index.evict_expired(now))
    }

    /// Locations of every record the index still needs
    pub fn live_locations(&self, now: u64) -> HashSet<Location> {
        let mut live = HashSet::new();
        dispatch!(self, index => index.collect_live(now, &mut live));
        live
    }

    /// Drop every index record stored at one of the `lost` locations
    ///
    /// Used when a merge finds those records unreadable; returns how many
    /// index records went.
    pub fn forget(&mut self, lost: &HashSet<Location>) -> usize {
        dispatch!(self, index => index.forget(lost))
    }

    /// Repoint records moved by a merge
    pub fn relocate(&mut self, remap: &Remap) {
        dispatch!(self, index => index.relocate(remap))
    }

    /// Bytes of log records referenced by the index
    pub fn live_bytes(&self) -> u64 {
        dispatch!(self, index => index.live_bytes())
    }

    /// Number of live entries (string keys or collection members)
    pub fn count(&self, now: u64) -> usize {
        dispatch!(self, index => index.count(now))
    }

    /// Members of one key (1 for a live string key)
    pub fn len(&self, key: &[u8], now: u64) -> usize {
        dispatch!(self, index => index.len(key, now))
    }

    /// Targets a scan over `range` will visit, in partition order
    pub fn scan_targets(&self, range: &ScanRange, now: u64) -> Vec<ScanTarget> {
        dispatch!(self, index => index.scan_targets(range, now))
    }

    pub fn as_list(&self) -> Option<&ListIndex> {
        match self {
            PartitionIndex::List(index) => Some(index),
            _ => None,
        }
    }

    pub fn as_zset(&self) -> Option<&ZSetIndex> {
        match self {
            PartitionIndex::SortedSet(index) => Some(index),
            _ => None,
        }
    }
}

/// Add `entry`'s bytes to a live-byte counter
pub(crate) fn add_bytes(live_bytes: &mut u64, entry: &IndexEntry) {
    *live_bytes += entry.location.len as u64;
}

/// Drop key deadlines stored at `lost` locations along with their bytes
pub(crate) fn forget_deadlines(
    expiry: &mut KeyExpiry,
    live_bytes: &mut u64,
    lost: &HashSet<Location>,
) -> usize {
    let dropped = expiry.forget(lost);
    for record in &dropped {
        sub_bytes(live_bytes, record);
    }
    dropped.len()
}

/// Remove `entry`'s bytes from a live-byte counter
pub(crate) fn sub_bytes(live_bytes: &mut u64, entry: &IndexEntry) {
    *live_bytes = live_bytes.saturating_sub(entry.location.len as u64);
}
