//! String partition index
//!
//! BTreeMap keyed by the logical key, so scans come out in key order.

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;

use crate::log::{Entry, EntryKind};

use super::{add_bytes, sub_bytes, IndexEntry, KeyState, Location, Lookup, Remap, ScanRange, ScanTarget};

#[derive(Debug, Default)]
pub struct StringIndex {
    entries: BTreeMap<Vec<u8>, IndexEntry>,
    live_bytes: u64,
}

impl StringIndex {
    pub fn apply(&mut self, entry: &Entry, location: Location) {
        match entry.kind {
            EntryKind::Put => {
                self.insert(&entry.key, IndexEntry::new(location, entry.expires_at));
            }
            EntryKind::Delete => {
                self.remove(&entry.key);
            }
            _ => {}
        }
    }

    /// Insert or overwrite, returning the replaced record
    pub fn insert(&mut self, key: &[u8], entry: IndexEntry) -> Option<IndexEntry> {
        add_bytes(&mut self.live_bytes, &entry);
        let old = self.entries.insert(key.to_vec(), entry);
        if let Some(old) = &old {
            sub_bytes(&mut self.live_bytes, old);
        }
        old
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<IndexEntry> {
        let old = self.entries.remove(key);
        if let Some(old) = &old {
            sub_bytes(&mut self.live_bytes, old);
        }
        old
    }

    pub fn get(&self, key: &[u8], now: u64) -> Lookup {
        match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => Lookup::Expired,
            Some(entry) => Lookup::Found(*entry),
            None => Lookup::Missing,
        }
    }

    pub fn key_state(&self, key: &[u8], now: u64) -> KeyState {
        match self.get(key, now) {
            Lookup::Found(entry) => KeyState::Live {
                expires_at: entry.expires_at,
            },
            Lookup::Expired => KeyState::Expired,
            Lookup::Missing => KeyState::Missing,
        }
    }

    pub fn remove_expired(&mut self, key: &[u8], now: u64) -> bool {
        if let Lookup::Expired = self.get(key, now) {
            self.remove(key);
            return true;
        }
        false
    }

    pub fn evict_expired(&mut self, now: u64) -> usize {
        let before = self.entries.len();
        let live_bytes = &mut self.live_bytes;
        self.entries.retain(|_, entry| {
            if entry.is_expired(now) {
                sub_bytes(live_bytes, entry);
                false
            } else {
                true
            }
        });
        before - self.entries.len()
    }

    pub fn collect_live(&self, now: u64, out: &mut HashSet<Location>) {
        out.extend(
            self.entries
                .values()
                .filter(|e| !e.is_expired(now))
                .map(|e| e.location),
        );
    }

    pub fn forget(&mut self, lost: &HashSet<Location>) -> usize {
        let before = self.entries.len();
        let live_bytes = &mut self.live_bytes;
        self.entries.retain(|_, entry| {
            if lost.contains(&entry.location) {
                sub_bytes(live_bytes, entry);
                false
            } else {
                true
            }
        });
        before - self.entries.len()
    }

    pub fn relocate(&mut self, remap: &Remap) {
        for entry in self.entries.values_mut() {
            entry.relocate(remap);
        }
    }

    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }

    pub fn count(&self, now: u64) -> usize {
        self.entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub fn len(&self, key: &[u8], now: u64) -> usize {
        usize::from(matches!(self.get(key, now), Lookup::Found(_)))
    }

    /// Live keys in `range`, ascending
    pub fn keys(&self, range: &ScanRange, now: u64) -> Vec<Vec<u8>> {
        let bounds: (Bound<&[u8]>, Bound<&[u8]>) = match range {
            ScanRange::All => (Bound::Unbounded, Bound::Unbounded),
            ScanRange::Prefix(prefix) => (Bound::Included(prefix.as_slice()), Bound::Unbounded),
            ScanRange::Range { start, end } => (as_slice_bound(start), as_slice_bound(end)),
        };
        if is_inverted(bounds) {
            // BTreeMap::range panics on these
            return Vec::new();
        }

        self.entries
            .range::<[u8], _>(bounds)
            .take_while(|(key, _)| match range {
                ScanRange::Prefix(prefix) => key.starts_with(prefix),
                _ => true,
            })
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn scan_targets(&self, range: &ScanRange, now: u64) -> Vec<ScanTarget> {
        self.keys(range, now).into_iter().map(ScanTarget::Key).collect()
    }
}

fn is_inverted(bounds: (Bound<&[u8]>, Bound<&[u8]>)) -> bool {
    match bounds {
        (Bound::Included(s), Bound::Included(e)) => s > e,
        (Bound::Included(s), Bound::Excluded(e)) | (Bound::Excluded(s), Bound::Included(e)) => s > e,
        (Bound::Excluded(s), Bound::Excluded(e)) => s >= e,
        _ => false,
    }
}

fn as_slice_bound(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(v) => Bound::Included(v.as_slice()),
        Bound::Excluded(v) => Bound::Excluded(v.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}
