//! Hash and set partition index
//!
//! Both partitions map a key to a set of members; a hash member carries a
//! value in its record, a set member does not. Members can expire on their
//! own and the key as a whole can carry a deadline.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::log::{Entry, EntryKind};

use super::{
    add_bytes, forget_deadlines, sub_bytes, IndexEntry, KeyExpiry, KeyState, Location, Lookup,
    Remap, ScanRange, ScanTarget,
};

#[derive(Debug, Default)]
pub struct MemberIndex {
    keys: HashMap<Vec<u8>, BTreeMap<Vec<u8>, IndexEntry>>,
    expiry: KeyExpiry,
    live_bytes: u64,
}

impl MemberIndex {
    pub fn apply(&mut self, entry: &Entry, location: Location) {
        let key = entry.key.as_slice();

        if self.expiry.is_expired(key, entry.timestamp) {
            self.clear(key);
        }

        match entry.kind {
            EntryKind::Put => {
                let record = IndexEntry::new(location, entry.expires_at);
                add_bytes(&mut self.live_bytes, &record);
                let old = self
                    .keys
                    .entry(key.to_vec())
                    .or_default()
                    .insert(entry.member.clone(), record);
                if let Some(old) = old {
                    sub_bytes(&mut self.live_bytes, &old);
                }
            }
            EntryKind::Delete => self.remove_member(key, &entry.member),
            EntryKind::Clear => self.clear(key),
            EntryKind::Expire => {
                if self.keys.contains_key(key) {
                    let record = IndexEntry::new(location, entry.expires_at);
                    let old = if record.expires_at == 0 {
                        self.expiry.remove(key)
                    } else {
                        add_bytes(&mut self.live_bytes, &record);
                        self.expiry.set(key, record)
                    };
                    if let Some(old) = old {
                        sub_bytes(&mut self.live_bytes, &old);
                    }
                }
            }
            _ => {}
        }
    }

    fn remove_member(&mut self, key: &[u8], member: &[u8]) {
        let Some(members) = self.keys.get_mut(key) else {
            return;
        };
        if let Some(old) = members.remove(member) {
            sub_bytes(&mut self.live_bytes, &old);
        }
        if members.is_empty() {
            self.clear(key);
        }
    }

    fn clear(&mut self, key: &[u8]) {
        if let Some(members) = self.keys.remove(key) {
            for record in members.values() {
                sub_bytes(&mut self.live_bytes, record);
            }
        }
        if let Some(record) = self.expiry.remove(key) {
            sub_bytes(&mut self.live_bytes, &record);
        }
    }

    pub fn get(&self, key: &[u8], member: &[u8], now: u64) -> Lookup {
        if self.expiry.is_expired(key, now) {
            return Lookup::Expired;
        }
        match self.keys.get(key).and_then(|m| m.get(member)) {
            Some(record) if record.is_expired(now) => Lookup::Expired,
            Some(record) => Lookup::Found(*record),
            None => Lookup::Missing,
        }
    }

    pub fn key_state(&self, key: &[u8], now: u64) -> KeyState {
        let Some(members) = self.keys.get(key) else {
            return KeyState::Missing;
        };
        if self.expiry.is_expired(key, now) || members.values().all(|r| r.is_expired(now)) {
            return KeyState::Expired;
        }
        KeyState::Live {
            expires_at: self.expiry.deadline(key).unwrap_or(0),
        }
    }

    pub fn remove_expired(&mut self, key: &[u8], member: &[u8], now: u64) -> bool {
        if self.expiry.is_expired(key, now) {
            self.clear(key);
            return true;
        }
        let expired = self
            .keys
            .get(key)
            .and_then(|m| m.get(member))
            .map_or(false, |r| r.is_expired(now));
        if expired {
            self.remove_member(key, member);
        }
        expired
    }

    pub fn evict_expired(&mut self, now: u64) -> usize {
        let mut evicted = 0;
        for key in self.expiry.expired_keys(now) {
            evicted += self.keys.get(&key).map_or(0, |m| m.len()) + 1;
            self.clear(&key);
        }

        let live_bytes = &mut self.live_bytes;
        let mut emptied = Vec::new();
        for (key, members) in self.keys.iter_mut() {
            members.retain(|_, record| {
                if record.is_expired(now) {
                    sub_bytes(live_bytes, record);
                    evicted += 1;
                    false
                } else {
                    true
                }
            });
            if members.is_empty() {
                emptied.push(key.clone());
            }
        }
        for key in emptied {
            self.clear(&key);
        }
        evicted
    }

    pub fn collect_live(&self, now: u64, out: &mut HashSet<Location>) {
        for (key, members) in &self.keys {
            if self.expiry.is_expired(key, now) {
                continue;
            }
            out.extend(
                members
                    .values()
                    .filter(|r| !r.is_expired(now))
                    .map(|r| r.location),
            );
        }
        self.expiry.collect_live(now, out);
    }

    pub fn forget(&mut self, lost: &HashSet<Location>) -> usize {
        let mut forgotten = 0;
        let live_bytes = &mut self.live_bytes;
        let mut emptied = Vec::new();
        for (key, members) in self.keys.iter_mut() {
            members.retain(|_, record| {
                if lost.contains(&record.location) {
                    sub_bytes(live_bytes, record);
                    forgotten += 1;
                    false
                } else {
                    true
                }
            });
            if members.is_empty() {
                emptied.push(key.clone());
            }
        }
        for key in emptied {
            self.clear(&key);
        }
        forgotten + forget_deadlines(&mut self.expiry, &mut self.live_bytes, lost)
    }

    pub fn relocate(&mut self, remap: &Remap) {
        for members in self.keys.values_mut() {
            for record in members.values_mut() {
                record.relocate(remap);
            }
        }
        self.expiry.relocate(remap);
    }

    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }

    pub fn count(&self, now: u64) -> usize {
        self.keys
            .keys()
            .map(|key| self.len(key, now))
            .sum()
    }

    pub fn len(&self, key: &[u8], now: u64) -> usize {
        if self.expiry.is_expired(key, now) {
            return 0;
        }
        self.keys
            .get(key)
            .map_or(0, |m| m.values().filter(|r| !r.is_expired(now)).count())
    }

    /// Live members of matching keys; keys ascending, members ascending
    pub fn scan_targets(&self, range: &ScanRange, now: u64) -> Vec<ScanTarget> {
        let mut keys: Vec<&Vec<u8>> = self
            .keys
            .keys()
            .filter(|key| range.contains(key) && !self.expiry.is_expired(key, now))
            .collect();
        keys.sort();

        let mut targets = Vec::new();
        for key in keys {
            let Some(members) = self.keys.get(key) else {
                continue;
            };
            for (member, record) in members {
                if !record.is_expired(now) {
                    targets.push(ScanTarget::Member {
                        key: key.clone(),
                        member: member.clone(),
                    });
                }
            }
        }
        targets
    }
}
