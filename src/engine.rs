//! Engine Module
//!
//! The facade that coordinates partitions, recovery and merge.
//!
//! ## Responsibilities
//! - Open every partition and replay its log before serving calls
//! - Validate arguments and turn operations into log records
//! - Serve reads from the index and the segment files
//! - Expose merge for external scheduling

use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::error::{BrambleError, Result};
use crate::index::{decode_score, encode_score, KeyState, ListIndex, Lookup, ScanRange, ZSetIndex};
use crate::log::{now_millis, Entry, EntryKind};
use crate::merge::{self, MergeStats};
use crate::partition::{DataType, Partition, PartitionState, PartitionStats};
use crate::recovery::RecoveryReport;
use crate::scan::Scan;

/// Remaining lifetime of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The key never expires
    NoExpiry,
    /// Time left, truncated to the configured granularity
    Remaining(Duration),
}

/// End of a list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEnd {
    Front,
    Back,
}

/// The storage engine
///
/// ## Concurrency Model
///
/// Every method takes `&self`; share the engine across threads with `Arc`.
///
/// - **Across partitions**: fully independent, no shared lock.
/// - **Within a partition**: writes serialize on the partition write gate and
///   then take the state lock exclusively for the append and index update.
///   Reads share the state lock.
/// - **Merge**: holds the write gate for its whole run, so writes to that
///   partition wait while reads keep being served.
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// One partition per data type, in `DataType::ALL` order
    partitions: Vec<Partition>,

    /// What recovery found in each partition at open
    recovery: Vec<RecoveryReport>,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate the config and create the data directory
    /// 2. For each partition: finish an interrupted merge, replay the log
    /// 3. Ready to serve requests
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let mut partitions = Vec::with_capacity(DataType::ALL.len());
        let mut recovery = Vec::with_capacity(DataType::ALL.len());
        for data_type in DataType::ALL {
            let (partition, report) = Partition::open(&config.data_dir, data_type, &config)?;
            partitions.push(partition);
            recovery.push(report);
        }

        tracing::info!(
            "Engine opened at {} ({:?} I/O)",
            config.data_dir.display(),
            config.io_mode
        );

        Ok(Self {
            config,
            partitions,
            recovery,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    // =========================================================================
    // Primitives
    // =========================================================================

    /// Write a value
    ///
    /// - String: `member` must be `None`.
    /// - List: appends `value` at the tail; no member, no per-element TTL.
    /// - Hash: `member` is the field.
    /// - Set: `member` is the element, `value` must be empty.
    /// - Sorted set: `member` is the member, `value` its score as 8 LE bytes.
    ///
    /// `ttl` makes the key (string) or member (hash, set, sorted set) expire.
    pub fn put(
        &self,
        data_type: DataType,
        key: &[u8],
        member: Option<&[u8]>,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.check_key(key)?;
        self.check_value(value)?;
        let expires_at = self.deadline(ttl)?;

        let entry = match data_type {
            DataType::String => {
                no_member(data_type, member)?;
                Entry::new(EntryKind::Put, data_type, key).with_value(value)
            }
            DataType::List => {
                no_member(data_type, member)?;
                if ttl.is_some() {
                    return Err(BrambleError::InvalidArgument(
                        "list elements cannot expire on their own; expire the key".into(),
                    ));
                }
                Entry::new(EntryKind::PushBack, data_type, key).with_value(value)
            }
            DataType::Hash => {
                let member = self.require_member(data_type, member)?;
                Entry::new(EntryKind::Put, data_type, key)
                    .with_member(member)
                    .with_value(value)
            }
            DataType::Set => {
                let member = self.require_member(data_type, member)?;
                if !value.is_empty() {
                    return Err(BrambleError::InvalidArgument(
                        "set elements go in the member, the value must be empty".into(),
                    ));
                }
                Entry::new(EntryKind::Put, data_type, key).with_member(member)
            }
            DataType::SortedSet => {
                let member = self.require_member(data_type, member)?;
                let score = decode_score(value).ok_or_else(|| {
                    BrambleError::InvalidArgument("sorted-set value must be an 8 byte score".into())
                })?;
                check_score(score)?;
                Entry::new(EntryKind::Put, data_type, key)
                    .with_member(member)
                    .with_value(value)
            }
        }
        .with_expiry(expires_at);

        self.partition(data_type).write(|state| {
            state.append(&entry)?;
            Ok(())
        })
    }

    /// Read a value
    ///
    /// Returns `KeyExpired` for a key or member past its deadline and
    /// `KeyNotFound` when there is nothing to read. Lists are read with
    /// [`Engine::list_index`] and [`Engine::list_range`].
    pub fn get(&self, data_type: DataType, key: &[u8], member: Option<&[u8]>) -> Result<Vec<u8>> {
        let member = match data_type {
            DataType::List => return Err(BrambleError::wrong_type(data_type, "get")),
            DataType::String => {
                no_member(data_type, member)?;
                &[][..]
            }
            _ => self.require_member(data_type, member)?,
        };

        let partition = self.partition(data_type);
        let now = now_millis();
        let lookup = {
            let state = partition.read();
            match state.index.get(key, member, now) {
                Lookup::Found(found) => return Ok(state.log.read(found.location)?.value),
                other => other,
            }
        };

        match lookup {
            Lookup::Expired => {
                partition.remove_expired(key, member, now);
                Err(BrambleError::KeyExpired)
            }
            _ => Err(BrambleError::KeyNotFound),
        }
    }

    /// Delete a key, or one member of a collection key
    ///
    /// With `member == None` a collection key is removed as a whole.
    pub fn delete(&self, data_type: DataType, key: &[u8], member: Option<&[u8]>) -> Result<()> {
        if data_type == DataType::String {
            no_member(data_type, member)?;
        }
        if data_type == DataType::List && member.is_some() {
            return Err(BrambleError::wrong_type(data_type, "delete member"));
        }

        self.partition(data_type).write(|state| {
            let now = now_millis();
            let (live, member, kind) = match member {
                Some(member) => (
                    matches!(state.index.get(key, member, now), Lookup::Found(_)),
                    member,
                    EntryKind::Delete,
                ),
                None => {
                    let kind = if data_type.is_collection() {
                        EntryKind::Clear
                    } else {
                        EntryKind::Delete
                    };
                    let live = matches!(state.index.key_state(key, now), KeyState::Live { .. });
                    (live, &[][..], kind)
                }
            };

            if !live {
                state.index.remove_expired(key, member, now);
                return Err(BrambleError::KeyNotFound);
            }
            let entry = Entry::new(kind, data_type, key).with_member(member);
            state.append(&entry)?;
            Ok(())
        })
    }

    /// Lazily iterate the live entries of keys in `range`
    ///
    /// Strings come out in key order; collection members come out per key
    /// (keys ascending) in list, member or score order.
    pub fn scan(&self, data_type: DataType, range: ScanRange) -> Scan<'_> {
        let partition = self.partition(data_type);
        let targets = partition.read().index.scan_targets(&range, now_millis());
        Scan::new(partition, targets)
    }

    /// Time left before a key expires
    pub fn ttl(&self, data_type: DataType, key: &[u8]) -> Result<Ttl> {
        let partition = self.partition(data_type);
        let now = now_millis();
        let state = partition.read().index.key_state(key, now);
        match state {
            KeyState::Live { expires_at: 0 } => Ok(Ttl::NoExpiry),
            KeyState::Live { expires_at } => Ok(Ttl::Remaining(
                self.config
                    .ttl_granularity
                    .truncate(expires_at.saturating_sub(now)),
            )),
            KeyState::Expired => {
                partition.remove_expired(key, &[], now);
                Err(BrambleError::KeyExpired)
            }
            KeyState::Missing => Err(BrambleError::KeyNotFound),
        }
    }

    /// Make a key expire `ttl` from now
    pub fn expire(&self, data_type: DataType, key: &[u8], ttl: Duration) -> Result<()> {
        let expires_at = self.deadline(Some(ttl))?;
        self.set_deadline(data_type, key, expires_at)
    }

    /// Remove a key's deadline
    pub fn persist(&self, data_type: DataType, key: &[u8]) -> Result<()> {
        self.set_deadline(data_type, key, 0)
    }

    /// Force a partition's active segment to durable storage
    pub fn sync(&self, data_type: DataType) -> Result<()> {
        self.partition(data_type).write(|state| state.log.sync())
    }

    /// Sync every partition
    pub fn sync_all(&self) -> Result<()> {
        for data_type in DataType::ALL {
            self.sync(data_type)?;
        }
        Ok(())
    }

    /// Close the engine gracefully
    ///
    /// Syncs and seals every active segment; file handles are released when
    /// the engine is dropped at the end of this call.
    pub fn close(self) -> Result<()> {
        for partition in &self.partitions {
            partition.write(|state| state.log.close())?;
        }
        tracing::info!("Engine at {} closed", self.config.data_dir.display());
        Ok(())
    }

    // =========================================================================
    // Merge
    // =========================================================================

    /// Merge a partition if its reclaimable ratio reached `merge_threshold`
    ///
    /// Returns `None` when the partition is below the threshold.
    pub fn trigger_merge(&self, data_type: DataType) -> Result<Option<MergeStats>> {
        let partition = self.partition(data_type);
        let stats = partition.stats();
        if stats.reclaimable_bytes == 0 || stats.reclaimable_ratio() < self.config.merge_threshold {
            tracing::debug!(
                "Skipping merge of {} partition ({:.2} reclaimable)",
                data_type,
                stats.reclaimable_ratio()
            );
            return Ok(None);
        }
        merge::run(partition).map(Some)
    }

    /// Merge a partition unconditionally
    pub fn merge(&self, data_type: DataType) -> Result<MergeStats> {
        merge::run(self.partition(data_type))
    }

    // =========================================================================
    // List operations
    // =========================================================================

    /// Push an element; returns the new list length
    pub fn list_push(&self, key: &[u8], value: &[u8], end: ListEnd) -> Result<usize> {
        self.check_key(key)?;
        self.check_value(value)?;
        let kind = match end {
            ListEnd::Front => EntryKind::PushFront,
            ListEnd::Back => EntryKind::PushBack,
        };
        let entry = Entry::new(kind, DataType::List, key).with_value(value);

        self.partition(DataType::List).write(|state| {
            state.append(&entry)?;
            Ok(state.index.len(key, now_millis()))
        })
    }

    /// Remove and return the head or tail element
    pub fn list_pop(&self, key: &[u8], end: ListEnd) -> Result<Vec<u8>> {
        let (front, kind) = match end {
            ListEnd::Front => (true, EntryKind::PopFront),
            ListEnd::Back => (false, EntryKind::PopBack),
        };

        self.partition(DataType::List).write(|state| {
            let now = now_millis();
            let lookup = list_index(state)?.end(key, front, now);
            match lookup {
                Lookup::Found(found) => {
                    let value = state.log.read(found.location)?.value;
                    state.append(&Entry::new(kind, DataType::List, key))?;
                    Ok(value)
                }
                Lookup::Expired => {
                    state.index.remove_expired(key, &[], now);
                    Err(BrambleError::KeyExpired)
                }
                Lookup::Missing => Err(BrambleError::KeyNotFound),
            }
        })
    }

    /// Element at `index`; negative indexes count from the tail
    pub fn list_index(&self, key: &[u8], index: i64) -> Result<Vec<u8>> {
        let partition = self.partition(DataType::List);
        let now = now_millis();
        let lookup = {
            let state = partition.read();
            match list_index(&state)?.get(key, index, now) {
                Lookup::Found(found) => return Ok(state.log.read(found.location)?.value),
                other => other,
            }
        };
        match lookup {
            Lookup::Expired => {
                partition.remove_expired(key, &[], now);
                Err(BrambleError::KeyExpired)
            }
            _ => Err(BrambleError::KeyNotFound),
        }
    }

    /// Elements from `start` to `stop` inclusive (negative = from the tail)
    pub fn list_range(&self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        let state = self.partition(DataType::List).read();
        list_index(&state)?
            .range(key, start, stop, now_millis())
            .into_iter()
            .map(|found| state.log.read(found.location).map(|entry| entry.value))
            .collect()
    }

    // =========================================================================
    // Sorted-set operations
    // =========================================================================

    /// Add a member or update its score
    pub fn zadd(&self, key: &[u8], member: &[u8], score: f64) -> Result<()> {
        check_score(score)?;
        self.put(DataType::SortedSet, key, Some(member), &encode_score(score), None)
    }

    /// Score of a member
    pub fn zscore(&self, key: &[u8], member: &[u8]) -> Result<f64> {
        let partition = self.partition(DataType::SortedSet);
        let now = now_millis();
        let lookup = {
            let state = partition.read();
            let zset = zset_index(&state)?;
            match zset.get(key, member, now) {
                Lookup::Found(_) => return zset.score(key, member, now).ok_or(BrambleError::KeyNotFound),
                other => other,
            }
        };
        match lookup {
            Lookup::Expired => {
                partition.remove_expired(key, member, now);
                Err(BrambleError::KeyExpired)
            }
            _ => Err(BrambleError::KeyNotFound),
        }
    }

    /// Members with `min <= score <= max`, ascending by score then member
    pub fn zrange_by_score(&self, key: &[u8], min: f64, max: f64) -> Result<Vec<(Vec<u8>, f64)>> {
        check_score(min)?;
        check_score(max)?;
        let state = self.partition(DataType::SortedSet).read();
        Ok(zset_index(&state)?.range_by_score(key, min, max, now_millis()))
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Live string keys or collection members in a partition
    pub fn count(&self, data_type: DataType) -> usize {
        self.partition(data_type).read().index.count(now_millis())
    }

    /// Live members of one key (1 for a live string key, 0 if absent)
    pub fn len(&self, data_type: DataType, key: &[u8]) -> usize {
        self.partition(data_type).read().index.len(key, now_millis())
    }

    /// Space accounting of a partition
    pub fn stats(&self, data_type: DataType) -> PartitionStats {
        self.partition(data_type).stats()
    }

    /// What recovery found in a partition when the engine was opened
    pub fn recovery_report(&self, data_type: DataType) -> &RecoveryReport {
        &self.recovery[slot(data_type)]
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn partition(&self, data_type: DataType) -> &Partition {
        &self.partitions[slot(data_type)]
    }

    /// Append a new deadline for a key (0 = none)
    fn set_deadline(&self, data_type: DataType, key: &[u8], expires_at: u64) -> Result<()> {
        self.partition(data_type).write(|state| {
            let now = now_millis();
            match state.index.key_state(key, now) {
                KeyState::Missing => return Err(BrambleError::KeyNotFound),
                KeyState::Expired => {
                    state.index.remove_expired(key, &[], now);
                    return Err(BrambleError::KeyExpired);
                }
                KeyState::Live { expires_at: current } if current == expires_at => return Ok(()),
                KeyState::Live { .. } => {}
            }

            let entry = match data_type {
                // A string's deadline lives in its record: write the value again
                DataType::String => {
                    let location = match state.index.get(key, &[], now) {
                        Lookup::Found(found) => found.location,
                        _ => return Err(BrambleError::KeyNotFound),
                    };
                    let value = state.log.read(location)?.value;
                    Entry::new(EntryKind::Put, data_type, key).with_value(value)
                }
                _ => Entry::new(EntryKind::Expire, data_type, key),
            }
            .with_expiry(expires_at);

            state.append(&entry)?;
            Ok(())
        })
    }

    /// Absolute deadline for a relative TTL (0 = none)
    fn deadline(&self, ttl: Option<Duration>) -> Result<u64> {
        match ttl {
            None => Ok(0),
            Some(ttl) if ttl.is_zero() => {
                Err(BrambleError::InvalidArgument("ttl must be positive".into()))
            }
            Some(ttl) => {
                let ms = self.config.ttl_granularity.round_up(ttl);
                Ok(now_millis().saturating_add(ms))
            }
        }
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() > self.config.max_key_size {
            return Err(BrambleError::KeyTooLarge {
                size: key.len(),
                max: self.config.max_key_size,
            });
        }
        Ok(())
    }

    fn check_value(&self, value: &[u8]) -> Result<()> {
        if value.len() > self.config.max_value_size {
            return Err(BrambleError::ValueTooLarge {
                size: value.len(),
                max: self.config.max_value_size,
            });
        }
        Ok(())
    }

    fn require_member<'m>(&self, data_type: DataType, member: Option<&'m [u8]>) -> Result<&'m [u8]> {
        let member = member.ok_or_else(|| {
            BrambleError::InvalidArgument(format!("{} operations need a member", data_type))
        })?;
        self.check_key(member)?;
        Ok(member)
    }
}

/// Position of a partition in `Engine::partitions`
fn slot(data_type: DataType) -> usize {
    data_type as usize - 1
}

fn no_member(data_type: DataType, member: Option<&[u8]>) -> Result<()> {
    match member {
        Some(_) => Err(BrambleError::InvalidArgument(format!(
            "{} keys have no members",
            data_type
        ))),
        None => Ok(()),
    }
}

fn check_score(score: f64) -> Result<()> {
    if score.is_nan() {
        return Err(BrambleError::InvalidArgument("score must not be NaN".into()));
    }
    Ok(())
}

fn list_index(state: &PartitionState) -> Result<&ListIndex> {
    state
        .index
        .as_list()
        .ok_or_else(|| BrambleError::wrong_type(state.index.data_type(), "list"))
}

fn zset_index(state: &PartitionState) -> Result<&ZSetIndex> {
    state
        .index
        .as_zset()
        .ok_or_else(|| BrambleError::wrong_type(state.index.data_type(), "sorted set"))
}
