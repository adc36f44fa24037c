//! List partition index
//!
//! One `VecDeque` of element locations per key, head first.
//!
//! Every element also has a rank: the head's rank drops by one on a front
//! push and grows by one on a front pop, so an element keeps its rank for as
//! long as it is in the list. Scans address elements by rank.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::log::{Entry, EntryKind};

use super::{
    add_bytes, forget_deadlines, sub_bytes, IndexEntry, KeyExpiry, KeyState, Location, Lookup,
    Remap, ScanRange, ScanTarget,
};

#[derive(Debug, Default)]
pub struct ListIndex {
    lists: HashMap<Vec<u8>, List>,
    expiry: KeyExpiry,
    live_bytes: u64,
    /// Generation handed to the next list created
    next_generation: u64,
}

/// One list and the bookkeeping that keeps element ranks stable
#[derive(Debug)]
struct List {
    /// Tells a recreated list apart from the one it replaced
    generation: u64,
    /// Rank of the head element
    head: i64,
    elements: VecDeque<IndexEntry>,
}

impl List {
    fn len(&self) -> usize {
        self.elements.len()
    }

    fn at_rank(&self, rank: i64) -> Option<IndexEntry> {
        let i = rank.checked_sub(self.head)?;
        usize::try_from(i).ok().and_then(|i| self.elements.get(i).copied())
    }
}

impl ListIndex {
    pub fn apply(&mut self, entry: &Entry, location: Location) {
        let key = entry.key.as_slice();

        // A write to a key whose deadline passed starts a fresh list
        if self.expiry.is_expired(key, entry.timestamp) {
            self.clear(key);
        }

        let record = IndexEntry::new(location, 0);
        match entry.kind {
            EntryKind::PushFront => {
                add_bytes(&mut self.live_bytes, &record);
                let list = self.list_mut(key);
                list.elements.push_front(record);
                list.head -= 1;
            }
            EntryKind::PushBack => {
                add_bytes(&mut self.live_bytes, &record);
                self.list_mut(key).elements.push_back(record);
            }
            EntryKind::PopFront => self.pop(key, true),
            EntryKind::PopBack => self.pop(key, false),
            EntryKind::Clear => self.clear(key),
            EntryKind::Expire => {
                if self.lists.contains_key(key) {
                    self.set_deadline(key, IndexEntry::new(location, entry.expires_at));
                }
            }
            _ => {}
        }
    }

    /// The list stored under `key`, created empty if needed
    fn list_mut(&mut self, key: &[u8]) -> &mut List {
        let next_generation = &mut self.next_generation;
        self.lists.entry(key.to_vec()).or_insert_with(|| {
            *next_generation += 1;
            List {
                generation: *next_generation,
                head: 0,
                elements: VecDeque::new(),
            }
        })
    }

    fn pop(&mut self, key: &[u8], front: bool) {
        let Some(list) = self.lists.get_mut(key) else {
            return;
        };
        let popped = if front {
            list.elements.pop_front()
        } else {
            list.elements.pop_back()
        };
        if let Some(popped) = popped {
            sub_bytes(&mut self.live_bytes, &popped);
            if front {
                list.head += 1;
            }
        }
        if list.elements.is_empty() {
            self.clear(key);
        }
    }

    fn set_deadline(&mut self, key: &[u8], record: IndexEntry) {
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

    /// Drop a list and its deadline
    fn clear(&mut self, key: &[u8]) {
        if let Some(list) = self.lists.remove(key) {
            for element in &list.elements {
                sub_bytes(&mut self.live_bytes, element);
            }
        }
        if let Some(record) = self.expiry.remove(key) {
            sub_bytes(&mut self.live_bytes, &record);
        }
    }

    pub fn key_state(&self, key: &[u8], now: u64) -> KeyState {
        if !self.lists.contains_key(key) {
            return KeyState::Missing;
        }
        if self.expiry.is_expired(key, now) {
            return KeyState::Expired;
        }
        KeyState::Live {
            expires_at: self.expiry.deadline(key).unwrap_or(0),
        }
    }

    /// Element at `index`; negative indexes count from the tail
    pub fn get(&self, key: &[u8], index: i64, now: u64) -> Lookup {
        match self.key_state(key, now) {
            KeyState::Missing => return Lookup::Missing,
            KeyState::Expired => return Lookup::Expired,
            KeyState::Live { .. } => {}
        }
        let Some(list) = self.lists.get(key) else {
            return Lookup::Missing;
        };
        match normalize(index, list.len()) {
            Some(i) => Lookup::Found(list.elements[i]),
            None => Lookup::Missing,
        }
    }

    /// Element with a given rank, provided the list is still generation
    /// `generation`
    pub fn get_by_rank(&self, key: &[u8], generation: u64, rank: i64, now: u64) -> Lookup {
        match self.key_state(key, now) {
            KeyState::Missing => return Lookup::Missing,
            KeyState::Expired => return Lookup::Expired,
            KeyState::Live { .. } => {}
        }
        self.lists
            .get(key)
            .filter(|list| list.generation == generation)
            .and_then(|list| list.at_rank(rank))
            .map_or(Lookup::Missing, Lookup::Found)
    }

    /// Head (`front`) or tail element
    pub fn end(&self, key: &[u8], front: bool, now: u64) -> Lookup {
        self.get(key, if front { 0 } else { -1 }, now)
    }

    /// Elements from `start` to `stop` inclusive; negative indexes count from
    /// the tail, out-of-range bounds are clamped
    pub fn range(&self, key: &[u8], start: i64, stop: i64, now: u64) -> Vec<IndexEntry> {
        if !matches!(self.key_state(key, now), KeyState::Live { .. }) {
            return Vec::new();
        }
        let Some(list) = self.lists.get(key) else {
            return Vec::new();
        };

        let len = list.len() as i64;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if start > stop || start >= len {
            return Vec::new();
        }
        list.elements
            .range(start as usize..=stop as usize)
            .copied()
            .collect()
    }

    pub fn remove_expired(&mut self, key: &[u8], now: u64) -> bool {
        if self.expiry.is_expired(key, now) {
            self.clear(key);
            return true;
        }
        false
    }

    pub fn evict_expired(&mut self, now: u64) -> usize {
        let mut evicted = 0;
        for key in self.expiry.expired_keys(now) {
            evicted += self.lists.get(&key).map_or(0, |l| l.len()) + 1;
            self.clear(&key);
        }
        evicted
    }

    pub fn collect_live(&self, now: u64, out: &mut HashSet<Location>) {
        for (key, list) in &self.lists {
            if !self.expiry.is_expired(key, now) {
                out.extend(list.elements.iter().map(|e| e.location));
            }
        }
        self.expiry.collect_live(now, out);
    }

    pub fn forget(&mut self, lost: &HashSet<Location>) -> usize {
        let mut forgotten = 0;
        let mut emptied = Vec::new();
        for (key, list) in self.lists.iter_mut() {
            let before = list.len();
            let live_bytes = &mut self.live_bytes;
            list.elements.retain(|element| {
                if lost.contains(&element.location) {
                    sub_bytes(live_bytes, element);
                    false
                } else {
                    true
                }
            });
            forgotten += before - list.len();
            if list.elements.is_empty() {
                emptied.push(key.clone());
            }
        }
        for key in emptied {
            self.clear(&key);
        }
        forgotten + forget_deadlines(&mut self.expiry, &mut self.live_bytes, lost)
    }

    pub fn relocate(&mut self, remap: &Remap) {
        for list in self.lists.values_mut() {
            for element in list.elements.iter_mut() {
                element.relocate(remap);
            }
        }
        self.expiry.relocate(remap);
    }

    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }

    pub fn count(&self, now: u64) -> usize {
        self.lists
            .iter()
            .filter(|(key, _)| !self.expiry.is_expired(key, now))
            .map(|(_, list)| list.len())
            .sum()
    }

    pub fn len(&self, key: &[u8], now: u64) -> usize {
        match self.key_state(key, now) {
            KeyState::Live { .. } => self.lists.get(key).map_or(0, |l| l.len()),
            _ => 0,
        }
    }

    pub fn scan_targets(&self, range: &ScanRange, now: u64) -> Vec<ScanTarget> {
        let mut keys: Vec<&Vec<u8>> = self
            .lists
            .keys()
            .filter(|key| range.contains(key) && !self.expiry.is_expired(key, now))
            .collect();
        keys.sort();

        let mut targets = Vec::new();
        for key in keys {
            let Some(list) = self.lists.get(key) else {
                continue;
            };
            let ranks = list.head..list.head + list.len() as i64;
            targets.extend(ranks.map(|rank| ScanTarget::Element {
                key: key.clone(),
                generation: list.generation,
                rank,
            }));
        }
        targets
    }
}

fn normalize(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let i = if index < 0 { len + index } else { index };
    (0..len).contains(&i).then_some(i as usize)
}
