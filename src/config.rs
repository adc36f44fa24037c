//! Configuration for BrambleKV
//!
//! Centralized configuration with sensible defaults. Loading it from a file is
//! left to the front-end; `Config` derives serde traits for that purpose.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BrambleError, Result};
use crate::log::HEADER_SIZE;

/// Main configuration for a BrambleKV instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all partitions
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── string/   (000000001.seg, 000000002.seg, ...)
    ///     ├── list/
    ///     ├── hash/
    ///     ├── set/
    ///     └── zset/
    pub data_dir: PathBuf,

    /// How segment files are read and written
    pub io_mode: IoMode,

    /// Rotation threshold: a segment never grows past this many bytes
    pub segment_size: u64,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync the active segment
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Merge Configuration
    // -------------------------------------------------------------------------
    /// Reclaimable/total byte ratio at which `trigger_merge` compacts
    pub merge_threshold: f64,

    // -------------------------------------------------------------------------
    // Expiry Configuration
    // -------------------------------------------------------------------------
    /// Resolution TTLs are rounded to
    pub ttl_granularity: TtlGranularity,

    // -------------------------------------------------------------------------
    // Limits
    // -------------------------------------------------------------------------
    /// Largest accepted key (and member) in bytes
    pub max_key_size: usize,

    /// Largest accepted value in bytes
    pub max_value_size: usize,
}

/// Segment I/O backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoMode {
    /// Buffered file I/O, flushed on sync
    Buffered,

    /// Memory-mapped segments
    Mmap,
}

/// Active segment sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced entries (balanced durability/performance)
    EveryNEntries { count: usize },

    /// Only when `sync` or `close` is called
    Manual,
}

/// Granularity for TTLs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TtlGranularity {
    Seconds,
    Milliseconds,
}

impl TtlGranularity {
    fn unit_ms(self) -> u64 {
        match self {
            TtlGranularity::Seconds => 1000,
            TtlGranularity::Milliseconds => 1,
        }
    }

    /// TTL in milliseconds, rounded up to the next whole unit
    pub fn round_up(self, ttl: Duration) -> u64 {
        let unit = self.unit_ms();
        let ms = ttl.as_millis().min(u64::MAX as u128) as u64;
        ms.div_ceil(unit).saturating_mul(unit)
    }

    /// Remaining milliseconds truncated to whole units
    pub fn truncate(self, remaining_ms: u64) -> Duration {
        let unit = self.unit_ms();
        Duration::from_millis(remaining_ms / unit * unit)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./bramble_data"),
            io_mode: IoMode::Buffered,
            segment_size: 64 * 1024 * 1024, // 64 MB
            sync_strategy: SyncStrategy::Manual,
            merge_threshold: 0.5,
            ttl_granularity: TtlGranularity::Seconds,
            max_key_size: 1024 * 1024,       // 1 MB
            max_value_size: 8 * 1024 * 1024, // 8 MB
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check option ranges before the engine touches the disk
    pub fn validate(&self) -> Result<()> {
        if self.segment_size <= HEADER_SIZE as u64 {
            return Err(BrambleError::Config(format!(
                "segment_size must exceed the {} byte entry header",
                HEADER_SIZE
            )));
        }
        if !(0.0..=1.0).contains(&self.merge_threshold) {
            return Err(BrambleError::Config(format!(
                "merge_threshold must be within [0, 1], got {}",
                self.merge_threshold
            )));
        }
        if let SyncStrategy::EveryNEntries { count: 0 } = self.sync_strategy {
            return Err(BrambleError::Config(
                "EveryNEntries count must be > 0".into(),
            ));
        }

        // Largest possible entry: header + key + member + value.
        // Entries that do not fit the segment are rejected per write.
        let largest = HEADER_SIZE as u64
            + 2 * self.max_key_size as u64
            + self.max_value_size as u64;
        if largest > u32::MAX as u64 {
            return Err(BrambleError::Config(
                "max_key_size/max_value_size exceed the 4 GB entry limit".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all partitions)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Select the segment I/O backend
    pub fn io_mode(mut self, mode: IoMode) -> Self {
        self.config.io_mode = mode;
        self
    }

    /// Set the segment rotation threshold (in bytes)
    pub fn segment_size(mut self, size: u64) -> Self {
        self.config.segment_size = size;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set the reclaimable ratio that makes `trigger_merge` compact
    pub fn merge_threshold(mut self, ratio: f64) -> Self {
        self.config.merge_threshold = ratio;
        self
    }

    /// Set the TTL granularity
    pub fn ttl_granularity(mut self, granularity: TtlGranularity) -> Self {
        self.config.ttl_granularity = granularity;
        self
    }

    /// Set the maximum key size (in bytes)
    pub fn max_key_size(mut self, size: usize) -> Self {
        self.config.max_key_size = size;
        self
    }

    /// Set the maximum value size (in bytes)
    pub fn max_value_size(mut self, size: usize) -> Self {
        self.config.max_value_size = size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
