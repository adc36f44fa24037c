//! Error types for BrambleKV
//!
//! Provides a unified error type for all engine operations.
//!
//! Callers can tell a missing key apart from an infrastructure failure with
//! [`BrambleError::is_not_found`]: `KeyNotFound`/`KeyExpired` mean "the key
//! does not exist", everything else means "something went wrong, retry later".

use thiserror::Error;

use crate::log::CodecError;
use crate::partition::DataType;

/// Result type alias using BrambleError
pub type Result<T> = std::result::Result<T, BrambleError>;

/// Unified error type for BrambleKV operations
#[derive(Debug, Error)]
pub enum BrambleError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Log Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt entry in segment {segment_id} at offset {offset}: {reason}")]
    CorruptEntry {
        segment_id: u32,
        offset: u64,
        reason: String,
    },

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Segment {0} does not exist")]
    SegmentNotFound(u32),

    // -------------------------------------------------------------------------
    // Lookup Results
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    KeyNotFound,

    #[error("Key expired")]
    KeyExpired,

    // -------------------------------------------------------------------------
    // Argument Errors
    // -------------------------------------------------------------------------
    #[error("Key too large: {size} bytes (max {max})")]
    KeyTooLarge { size: usize, max: usize },

    #[error("Value too large: {size} bytes (max {max})")]
    ValueTooLarge { size: usize, max: usize },

    #[error("Entry too large for a segment: {size} bytes (max {max})")]
    EntryTooLarge { size: u64, max: u64 },

    #[error("Operation {operation} is not supported on {data_type} partition")]
    WrongType {
        data_type: DataType,
        operation: &'static str,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // -------------------------------------------------------------------------
    // Merge Errors
    // -------------------------------------------------------------------------
    #[error("Merge error: {0}")]
    Merge(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BrambleError {
    /// True for the "key does not exist" family (absent or past its deadline)
    pub fn is_not_found(&self) -> bool {
        matches!(self, BrambleError::KeyNotFound | BrambleError::KeyExpired)
    }

    pub(crate) fn wrong_type(data_type: DataType, operation: &'static str) -> Self {
        BrambleError::WrongType {
            data_type,
            operation,
        }
    }
}

impl From<bincode::Error> for BrambleError {
    fn from(e: bincode::Error) -> Self {
        BrambleError::Serialization(e.to_string())
    }
}
