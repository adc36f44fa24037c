//! # BrambleKV
//!
//! An embedded, log-structured key-value store with:
//! - Five partitions: string, list, hash, set and sorted set
//! - Append-only segment logs with CRC-checked records
//! - Buffered or memory-mapped segment I/O
//! - Index rebuild by log replay at startup
//! - Crash-consistent merge (compaction) of stale records
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                              │
//! │        put / get / delete / scan / ttl / merge              │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │  one per data type
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                       Partition                             │
//! │           (write gate + RwLock<log, index>)                 │
//! └──────────┬──────────────────────────────────┬───────────────┘
//!            │                                  │
//!            ▼                                  ▼
//!   ┌─────────────────┐                ┌─────────────────┐
//!   │   Segment Log   │                │      Index      │
//!   │ (append, read)  │◄── Recovery ───│ (key → location)│
//!   └────────┬────────┘                └─────────────────┘
//!            │                                  ▲
//!            ▼                                  │
//!   ┌─────────────────┐                         │
//!   │   I/O Backend   │                       Merge
//!   │ (buffered/mmap) │
//!   └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use bramblekv::{DataType, Engine};
//!
//! let engine = Engine::open_path(std::path::Path::new("./data"))?;
//! engine.put(DataType::String, b"greeting", None, b"hello", None)?;
//! assert_eq!(engine.get(DataType::String, b"greeting", None)?, b"hello");
//! engine.close()?;
//! # Ok::<(), bramblekv::BrambleError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod log;
pub mod index;
pub mod partition;
pub mod recovery;
pub mod merge;
pub mod scan;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Config, IoMode, SyncStrategy, TtlGranularity};
pub use engine::{Engine, ListEnd, Ttl};
pub use error::{BrambleError, Result};
pub use index::ScanRange;
pub use merge::MergeStats;
pub use partition::{DataType, PartitionStats};
pub use recovery::RecoveryReport;
pub use scan::{Scan, ScanEntry};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of BrambleKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
