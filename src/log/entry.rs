//! Log Entry definitions
//!
//! Defines the structure of individual log records.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::partition::DataType;

/// A single record in a segment
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// What the record does
    pub kind: EntryKind,

    /// Partition the record belongs to
    pub data_type: DataType,

    /// Logical key
    pub key: Vec<u8>,

    /// Hash field, set element or sorted-set member (empty otherwise)
    pub member: Vec<u8>,

    /// Payload: string value, hash value, list element or sorted-set score
    pub value: Vec<u8>,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,

    /// Absolute deadline (unix millis), 0 = never
    pub expires_at: u64,
}

/// Operations that can be logged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntryKind {
    /// Insert or overwrite a key (or member)
    Put = 1,

    /// Remove a key (or member)
    Delete = 2,

    /// Remove a whole collection key
    Clear = 3,

    /// Set the key-level deadline of a collection key (0 = persist)
    Expire = 4,

    /// Push an element to the head of a list
    PushFront = 5,

    /// Push an element to the tail of a list
    PushBack = 6,

    /// Pop the head element of a list
    PopFront = 7,

    /// Pop the tail element of a list
    PopBack = 8,
}

impl EntryKind {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(EntryKind::Put),
            2 => Some(EntryKind::Delete),
            3 => Some(EntryKind::Clear),
            4 => Some(EntryKind::Expire),
            5 => Some(EntryKind::PushFront),
            6 => Some(EntryKind::PushBack),
            7 => Some(EntryKind::PopFront),
            8 => Some(EntryKind::PopBack),
            _ => None,
        }
    }
}

impl Entry {
    /// Create an entry stamped with the current time
    pub fn new(kind: EntryKind, data_type: DataType, key: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            data_type,
            key: key.into(),
            member: Vec::new(),
            value: Vec::new(),
            timestamp: now_millis(),
            expires_at: 0,
        }
    }

    pub fn with_member(mut self, member: impl Into<Vec<u8>>) -> Self {
        self.member = member.into();
        self
    }

    pub fn with_value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_expiry(mut self, expires_at: u64) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Whether the deadline has passed at `now`
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at != 0 && self.expires_at <= now
    }
}

/// Current unix time in milliseconds
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
