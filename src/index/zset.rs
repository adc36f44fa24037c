//! Sorted-set partition index

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::Bound;

use crate::log::{Entry, EntryKind};

use super::{
    add_bytes, forget_deadlines, sub_bytes, IndexEntry, KeyExpiry, KeyState, Location, Lookup,
    Remap, ScanRange, ScanTarget,
};

/// A member score with a total order (`f64::total_cmp`)
#[derive(Debug, Clone, Copy)]
pub struct Score(pub f64);

impl Score {
    /// Score with `-0.0` folded into `0.0`, which `total_cmp` would order first
    pub fn new(score: f64) -> Self {
        Score(if score == 0.0 { 0.0 } else { score })
    }
}

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Score as stored in an entry's value
pub fn encode_score(score: f64) -> Vec<u8> {
    Score::new(score).0.to_le_bytes().to_vec()
}

/// Score from an entry's value; `None` if it is not 8 bytes
pub fn decode_score(bytes: &[u8]) -> Option<f64> {
    let raw: [u8; 8] = bytes.try_into().ok()?;
    Some(f64::from_le_bytes(raw))
}

#[derive(Debug, Default)]
struct SortedSet {
    members: HashMap<Vec<u8>, (Score, IndexEntry)>,
    by_score: BTreeSet<(Score, Vec<u8>)>,
}

impl SortedSet {
    fn insert(&mut self, member: &[u8], score: Score, record: IndexEntry) -> Option<IndexEntry> {
        let old = self.remove(member);
        self.members.insert(member.to_vec(), (score, record));
        self.by_score.insert((score, member.to_vec()));
        old
    }

    fn remove(&mut self, member: &[u8]) -> Option<IndexEntry> {
        let (score, record) = self.members.remove(member)?;
        self.by_score.remove(&(score, member.to_vec()));
        Some(record)
    }

    fn live(&self, now: u64) -> impl Iterator<Item = (&Vec<u8>, f64, &IndexEntry)> + '_ {
        self.by_score.iter().filter_map(move |(score, member)| {
            let (_, record) = self.members.get(member)?;
            (!record.is_expired(now)).then_some((member, score.0, record))
        })
    }
}

#[derive(Debug, Default)]
pub struct ZSetIndex {
    keys: HashMap<Vec<u8>, SortedSet>,
    expiry: KeyExpiry,
    live_bytes: u64,
}

impl ZSetIndex {
    pub fn apply(&mut self, entry: &Entry, location: Location) {
        let key = entry.key.as_slice();

        if self.expiry.is_expired(key, entry.timestamp) {
            self.clear(key);
        }

        match entry.kind {
            EntryKind::Put => {
                let Some(score) = decode_score(&entry.value) else {
                    tracing::warn!(
                        "Ignoring sorted-set record at {:?} with a {} byte score",
                        location,
                        entry.value.len()
                    );
                    return;
                };
                let record = IndexEntry::new(location, entry.expires_at);
                add_bytes(&mut self.live_bytes, &record);
                let old = self.keys.entry(key.to_vec()).or_default().insert(
                    &entry.member,
                    Score::new(score),
                    record,
                );
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
        let Some(set) = self.keys.get_mut(key) else {
            return;
        };
        if let Some(old) = set.remove(member) {
            sub_bytes(&mut self.live_bytes, &old);
        }
        if set.members.is_empty() {
            self.clear(key);
        }
    }

    fn clear(&mut self, key: &[u8]) {
        if let Some(set) = self.keys.remove(key) {
            for (_, record) in set.members.values() {
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
        match self.keys.get(key).and_then(|s| s.members.get(member)) {
            Some((_, record)) if record.is_expired(now) => Lookup::Expired,
            Some((_, record)) => Lookup::Found(*record),
            None => Lookup::Missing,
        }
    }

    /// Score of a live member
    pub fn score(&self, key: &[u8], member: &[u8], now: u64) -> Option<f64> {
        match self.get(key, member, now) {
            Lookup::Found(_) => self
                .keys
                .get(key)
                .and_then(|s| s.members.get(member))
                .map(|(score, _)| score.0),
            _ => None,
        }
    }

    /// Live members with `min <= score <= max`, ascending by (score, member)
    pub fn range_by_score(&self, key: &[u8], min: f64, max: f64, now: u64) -> Vec<(Vec<u8>, f64)> {
        let (min, max) = (Score::new(min), Score::new(max));
        if self.expiry.is_expired(key, now) || min > max {
            return Vec::new();
        }
        let Some(set) = self.keys.get(key) else {
            return Vec::new();
        };

        let start = Bound::Included((min, Vec::new()));
        set.by_score
            .range((start, Bound::Unbounded))
            .take_while(|(score, _)| *score <= max)
            .filter_map(|(score, member)| {
                let (_, record) = set.members.get(member)?;
                (!record.is_expired(now)).then(|| (member.clone(), score.0))
            })
            .collect()
    }

    pub fn key_state(&self, key: &[u8], now: u64) -> KeyState {
        let Some(set) = self.keys.get(key) else {
            return KeyState::Missing;
        };
        if self.expiry.is_expired(key, now) || set.live(now).next().is_none() {
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
            .and_then(|s| s.members.get(member))
            .map_or(false, |(_, r)| r.is_expired(now));
        if expired {
            self.remove_member(key, member);
        }
        expired
    }

    pub fn evict_expired(&mut self, now: u64) -> usize {
        let mut evicted = 0;
        for key in self.expiry.expired_keys(now) {
            evicted += self.keys.get(&key).map_or(0, |s| s.members.len()) + 1;
            self.clear(&key);
        }

        let mut stale: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        for (key, set) in &self.keys {
            for (member, (_, record)) in &set.members {
                if record.is_expired(now) {
                    stale.push((key.clone(), member.clone()));
                }
            }
        }
        evicted += stale.len();
        for (key, member) in stale {
            self.remove_member(&key, &member);
        }
        evicted
    }

    pub fn collect_live(&self, now: u64, out: &mut HashSet<Location>) {
        for (key, set) in &self.keys {
            if !self.expiry.is_expired(key, now) {
                out.extend(set.live(now).map(|(_, _, record)| record.location));
            }
        }
        self.expiry.collect_live(now, out);
    }

    pub fn forget(&mut self, lost: &HashSet<Location>) -> usize {
        let mut gone: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        for (key, set) in &self.keys {
            for (member, (_, record)) in &set.members {
                if lost.contains(&record.location) {
                    gone.push((key.clone(), member.clone()));
                }
            }
        }
        let forgotten = gone.len();
        for (key, member) in gone {
            self.remove_member(&key, &member);
        }
        forgotten + forget_deadlines(&mut self.expiry, &mut self.live_bytes, lost)
    }

    pub fn relocate(&mut self, remap: &Remap) {
        for set in self.keys.values_mut() {
            for (_, record) in set.members.values_mut() {
                record.relocate(remap);
            }
        }
        self.expiry.relocate(remap);
    }

    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }

    pub fn count(&self, now: u64) -> usize {
        self.keys.keys().map(|key| self.len(key, now)).sum()
    }

    pub fn len(&self, key: &[u8], now: u64) -> usize {
        if self.expiry.is_expired(key, now) {
            return 0;
        }
        self.keys.get(key).map_or(0, |s| s.live(now).count())
    }

    /// Live members of matching keys; keys ascending, members by score
    pub fn scan_targets(&self, range: &ScanRange, now: u64) -> Vec<ScanTarget> {
        let mut keys: Vec<&Vec<u8>> = self
            .keys
            .keys()
            .filter(|key| range.contains(key) && !self.expiry.is_expired(key, now))
            .collect();
        keys.sort();

        let mut targets = Vec::new();
        for key in keys {
            if let Some(set) = self.keys.get(key) {
                targets.extend(set.live(now).map(|(member, _, _)| ScanTarget::Member {
                    key: key.clone(),
                    member: member.clone(),
                }));
            }
        }
        targets
    }
}
