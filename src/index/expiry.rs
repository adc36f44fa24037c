//! Key-level deadlines for collection partitions
//!
//! A collection key (list, hash, set, sorted set) can carry one deadline that
//! applies to all of its members. The deadline is itself a log record
//! (`EntryKind::Expire`), so the table keeps its location for merge.

use std::collections::{HashMap, HashSet};

use super::{IndexEntry, Location, Remap};

#[derive(Debug, Default)]
pub struct KeyExpiry {
    records: HashMap<Vec<u8>, IndexEntry>,
}

impl KeyExpiry {
    /// Record a deadline, returning the record it replaces
    pub fn set(&mut self, key: &[u8], entry: IndexEntry) -> Option<IndexEntry> {
        self.records.insert(key.to_vec(), entry)
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<IndexEntry> {
        self.records.remove(key)
    }

    /// Deadline of `key` in unix millis, if it has one
    pub fn deadline(&self, key: &[u8]) -> Option<u64> {
        self.records.get(key).map(|e| e.expires_at)
    }

    pub fn is_expired(&self, key: &[u8], now: u64) -> bool {
        self.records.get(key).map_or(false, |e| e.is_expired(now))
    }

    /// Keys whose deadline has passed
    pub fn expired_keys(&self, now: u64) -> Vec<Vec<u8>> {
        self.records
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn collect_live(&self, now: u64, out: &mut HashSet<Location>) {
        out.extend(
            self.records
                .values()
                .filter(|e| !e.is_expired(now))
                .map(|e| e.location),
        );
    }

    /// Drop deadlines whose record is in `lost`, returning them
    pub fn forget(&mut self, lost: &HashSet<Location>) -> Vec<IndexEntry> {
        let mut dropped = Vec::new();
        self.records.retain(|_, entry| {
            if lost.contains(&entry.location) {
                dropped.push(*entry);
                false
            } else {
                true
            }
        });
        dropped
    }

    pub fn relocate(&mut self, remap: &Remap) {
        for entry in self.records.values_mut() {
            entry.relocate(remap);
        }
    }
}
