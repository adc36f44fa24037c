//! Tests for the partition indexes
//!
//! Records are applied with synthetic locations; no files are involved.

use std::collections::HashSet;
use std::ops::Bound;

use bramblekv::index::{
    encode_score, IndexEntry, KeyState, Location, Lookup, PartitionIndex, Remap, ScanRange,
    ScanTarget,
};
use bramblekv::log::{Entry, EntryKind};
use bramblekv::DataType;

// =============================================================================
// Helper Functions
// =============================================================================

/// Applies records at consecutive synthetic locations
struct Feeder {
    index: PartitionIndex,
    next_offset: u64,
}

impl Feeder {
    fn new(data_type: DataType) -> Self {
        Self {
            index: PartitionIndex::new(data_type),
            next_offset: 0,
        }
    }

    fn apply(&mut self, entry: Entry) -> Location {
        let location = Location {
            segment_id: 1,
            offset: self.next_offset,
            len: 10,
        };
        self.next_offset += 10;
        self.index.apply(&entry, location);
        location
    }
}

fn entry(kind: EntryKind, data_type: DataType, key: &str) -> Entry {
    Entry::new(kind, data_type, key.as_bytes().to_vec()).with_timestamp(1_000)
}

fn found(lookup: Lookup) -> Location {
    match lookup {
        Lookup::Found(IndexEntry { location, .. }) => location,
        other => panic!("expected a live entry, got {:?}", other),
    }
}

const NOW: u64 = 2_000;

// =============================================================================
// String Index
// =============================================================================

#[test]
fn test_string_put_overwrite_delete() {
    let mut f = Feeder::new(DataType::String);

    let first = f.apply(entry(EntryKind::Put, DataType::String, "k"));
    assert_eq!(found(f.index.get(b"k", b"", NOW)), first);
    assert_eq!(f.index.live_bytes(), 10);

    let second = f.apply(entry(EntryKind::Put, DataType::String, "k"));
    assert_eq!(found(f.index.get(b"k", b"", NOW)), second);
    assert_eq!(f.index.live_bytes(), 10);
    assert_eq!(f.index.count(NOW), 1);

    f.apply(entry(EntryKind::Delete, DataType::String, "k"));
    assert_eq!(f.index.get(b"k", b"", NOW), Lookup::Missing);
    assert_eq!(f.index.live_bytes(), 0);
    assert_eq!(f.index.count(NOW), 0);
}

#[test]
fn test_string_expiry() {
    let mut f = Feeder::new(DataType::String);
    f.apply(entry(EntryKind::Put, DataType::String, "short").with_expiry(1_500));
    f.apply(entry(EntryKind::Put, DataType::String, "long").with_expiry(5_000));
    f.apply(entry(EntryKind::Put, DataType::String, "forever"));

    assert_eq!(f.index.get(b"short", b"", NOW), Lookup::Expired);
    assert_eq!(f.index.key_state(b"short", NOW), KeyState::Expired);
    assert_eq!(
        f.index.key_state(b"long", NOW),
        KeyState::Live { expires_at: 5_000 }
    );
    assert_eq!(
        f.index.key_state(b"forever", NOW),
        KeyState::Live { expires_at: 0 }
    );
    assert_eq!(f.index.count(NOW), 2);

    assert_eq!(f.index.evict_expired(NOW), 1);
    assert_eq!(f.index.get(b"short", b"", NOW), Lookup::Missing);
    assert_eq!(f.index.live_bytes(), 20);
}

#[test]
fn test_string_scan_ranges() {
    let mut f = Feeder::new(DataType::String);
    for key in ["user:2", "order:1", "user:1", "user:3", "zebra"] {
        f.apply(entry(EntryKind::Put, DataType::String, key));
    }
    let keys = |range: ScanRange| -> Vec<String> {
        f.index
            .scan_targets(&range, NOW)
            .into_iter()
            .map(|t| match t {
                ScanTarget::Key(k) => String::from_utf8(k).unwrap(),
                other => panic!("unexpected target {:?}", other),
            })
            .collect()
    };

    assert_eq!(
        keys(ScanRange::All),
        vec!["order:1", "user:1", "user:2", "user:3", "zebra"]
    );
    assert_eq!(
        keys(ScanRange::Prefix(b"user:".to_vec())),
        vec!["user:1", "user:2", "user:3"]
    );
    assert_eq!(
        keys(ScanRange::Range {
            start: Bound::Excluded(b"user:1".to_vec()),
            end: Bound::Included(b"user:3".to_vec()),
        }),
        vec!["user:2", "user:3"]
    );
    // Inverted bounds yield nothing instead of panicking
    assert!(keys(ScanRange::Range {
        start: Bound::Included(b"z".to_vec()),
        end: Bound::Excluded(b"a".to_vec()),
    })
    .is_empty());
}

// =============================================================================
// List Index
// =============================================================================

#[test]
fn test_list_push_pop_order() {
    let mut f = Feeder::new(DataType::List);
    let a = f.apply(entry(EntryKind::PushBack, DataType::List, "l"));
    let b = f.apply(entry(EntryKind::PushBack, DataType::List, "l"));
    let c = f.apply(entry(EntryKind::PushFront, DataType::List, "l"));

    let list = f.index.as_list().unwrap();
    assert_eq!(found(list.get(b"l", 0, NOW)), c);
    assert_eq!(found(list.get(b"l", 1, NOW)), a);
    assert_eq!(found(list.get(b"l", -1, NOW)), b);
    assert_eq!(list.get(b"l", 3, NOW), Lookup::Missing);
    assert_eq!(list.get(b"l", -4, NOW), Lookup::Missing);

    f.apply(entry(EntryKind::PopFront, DataType::List, "l"));
    f.apply(entry(EntryKind::PopBack, DataType::List, "l"));
    let list = f.index.as_list().unwrap();
    assert_eq!(found(list.end(b"l", true, NOW)), a);
    assert_eq!(f.index.len(b"l", NOW), 1);
    assert_eq!(f.index.live_bytes(), 10);
}

#[test]
fn test_list_range_clamps() {
    let mut f = Feeder::new(DataType::List);
    let locations: Vec<Location> = (0..5)
        .map(|_| f.apply(entry(EntryKind::PushBack, DataType::List, "l")))
        .collect();
    let list = f.index.as_list().unwrap();
    let range = |start, stop| -> Vec<Location> {
        list.range(b"l", start, stop, NOW)
            .into_iter()
            .map(|e| e.location)
            .collect()
    };

    assert_eq!(range(0, -1), locations);
    assert_eq!(range(1, 2), locations[1..=2].to_vec());
    assert_eq!(range(-2, 100), locations[3..].to_vec());
    assert_eq!(range(-100, 0), locations[..1].to_vec());
    assert!(range(3, 1).is_empty());
    assert!(range(10, 20).is_empty());
}

#[test]
fn test_list_emptied_key_disappears() {
    let mut f = Feeder::new(DataType::List);
    f.apply(entry(EntryKind::PushBack, DataType::List, "l"));
    f.apply(entry(EntryKind::Expire, DataType::List, "l").with_expiry(9_000));
    f.apply(entry(EntryKind::PopBack, DataType::List, "l"));

    assert_eq!(f.index.key_state(b"l", NOW), KeyState::Missing);
    // The deadline went with the key
    assert_eq!(f.index.live_bytes(), 0);
}

#[test]
fn test_collection_recreated_after_expiry_starts_empty() {
    let mut f = Feeder::new(DataType::List);
    f.apply(entry(EntryKind::PushBack, DataType::List, "l").with_timestamp(100));
    f.apply(entry(EntryKind::PushBack, DataType::List, "l").with_timestamp(110));
    f.apply(entry(EntryKind::Expire, DataType::List, "l").with_expiry(500).with_timestamp(120));
    let fresh = f.apply(entry(EntryKind::PushBack, DataType::List, "l").with_timestamp(600));

    assert_eq!(f.index.len(b"l", NOW), 1);
    assert_eq!(f.index.key_state(b"l", NOW), KeyState::Live { expires_at: 0 });
    assert_eq!(found(f.index.as_list().unwrap().get(b"l", 0, NOW)), fresh);
}

#[test]
fn test_list_scan_targets_ranks() {
    let mut f = Feeder::new(DataType::List);
    f.apply(entry(EntryKind::PushBack, DataType::List, "b"));
    f.apply(entry(EntryKind::PushBack, DataType::List, "a"));
    f.apply(entry(EntryKind::PushBack, DataType::List, "a"));
    f.apply(entry(EntryKind::PushFront, DataType::List, "a"));

    let element = |key: &str, generation, rank| ScanTarget::Element {
        key: key.as_bytes().to_vec(),
        generation,
        rank,
    };
    let targets = f.index.scan_targets(&ScanRange::All, NOW);
    assert_eq!(
        targets,
        vec![
            element("a", 2, -1),
            element("a", 2, 0),
            element("a", 2, 1),
            element("b", 1, 0),
        ]
    );
}

#[test]
fn test_list_rank_survives_pops_and_pushes() {
    let mut f = Feeder::new(DataType::List);
    f.apply(entry(EntryKind::PushBack, DataType::List, "l"));
    let second = f.apply(entry(EntryKind::PushBack, DataType::List, "l"));
    let third = f.apply(entry(EntryKind::PushBack, DataType::List, "l"));
    let targets = f.index.scan_targets(&ScanRange::All, NOW);

    f.apply(entry(EntryKind::PopFront, DataType::List, "l"));
    assert_eq!(f.index.resolve(&targets[0], NOW), Lookup::Missing);

    // Pushing in front moves every position but no rank
    f.apply(entry(EntryKind::PushFront, DataType::List, "l"));
    f.apply(entry(EntryKind::PushFront, DataType::List, "l"));
    assert_eq!(found(f.index.resolve(&targets[1], NOW)), second);
    assert_eq!(found(f.index.resolve(&targets[2], NOW)), third);
    assert_eq!(found(f.index.as_list().unwrap().get(b"l", 2, NOW)), second);
}

#[test]
fn test_list_rank_does_not_match_recreated_list() {
    let mut f = Feeder::new(DataType::List);
    f.apply(entry(EntryKind::PushBack, DataType::List, "l"));
    let targets = f.index.scan_targets(&ScanRange::All, NOW);

    f.apply(entry(EntryKind::Clear, DataType::List, "l"));
    f.apply(entry(EntryKind::PushBack, DataType::List, "l"));

    assert_eq!(f.index.resolve(&targets[0], NOW), Lookup::Missing);
}

// =============================================================================
// Hash / Set Index
// =============================================================================

#[test]
fn test_hash_members() {
    let mut f = Feeder::new(DataType::Hash);
    let name = f.apply(entry(EntryKind::Put, DataType::Hash, "h").with_member(b"name".to_vec()));
    f.apply(entry(EntryKind::Put, DataType::Hash, "h").with_member(b"age".to_vec()));
    f.apply(entry(EntryKind::Delete, DataType::Hash, "h").with_member(b"age".to_vec()));

    assert_eq!(found(f.index.get(b"h", b"name", NOW)), name);
    assert_eq!(f.index.get(b"h", b"age", NOW), Lookup::Missing);
    assert_eq!(f.index.len(b"h", NOW), 1);

    f.apply(entry(EntryKind::Clear, DataType::Hash, "h"));
    assert_eq!(f.index.key_state(b"h", NOW), KeyState::Missing);
    assert_eq!(f.index.live_bytes(), 0);
}

#[test]
fn test_member_expiry_and_key_expiry() {
    let mut f = Feeder::new(DataType::Set);
    f.apply(entry(EntryKind::Put, DataType::Set, "s").with_member(b"gone".to_vec()).with_expiry(1_500));
    f.apply(entry(EntryKind::Put, DataType::Set, "s").with_member(b"kept".to_vec()));
    f.apply(entry(EntryKind::Put, DataType::Set, "t").with_member(b"x".to_vec()));
    f.apply(entry(EntryKind::Expire, DataType::Set, "t").with_expiry(1_800));

    assert_eq!(f.index.get(b"s", b"gone", NOW), Lookup::Expired);
    assert_eq!(f.index.get(b"t", b"x", NOW), Lookup::Expired);
    assert_eq!(f.index.len(b"s", NOW), 1);
    assert_eq!(f.index.count(NOW), 1);

    // expired member, key t with its member and deadline
    assert_eq!(f.index.evict_expired(NOW), 3);
    assert_eq!(f.index.key_state(b"t", NOW), KeyState::Missing);
    assert_eq!(f.index.live_bytes(), 10);
}

#[test]
fn test_persist_removes_deadline() {
    let mut f = Feeder::new(DataType::Hash);
    f.apply(entry(EntryKind::Put, DataType::Hash, "h").with_member(b"f".to_vec()));
    f.apply(entry(EntryKind::Expire, DataType::Hash, "h").with_expiry(1_800));
    f.apply(entry(EntryKind::Expire, DataType::Hash, "h"));

    assert_eq!(f.index.key_state(b"h", NOW), KeyState::Live { expires_at: 0 });
    assert_eq!(f.index.live_bytes(), 10);
}

#[test]
fn test_remove_expired_on_read() {
    let mut f = Feeder::new(DataType::Hash);
    f.apply(entry(EntryKind::Put, DataType::Hash, "h").with_member(b"a".to_vec()).with_expiry(1_500));
    f.apply(entry(EntryKind::Put, DataType::Hash, "h").with_member(b"b".to_vec()));

    assert!(f.index.remove_expired(b"h", b"a", NOW));
    assert!(!f.index.remove_expired(b"h", b"b", NOW));
    assert_eq!(f.index.get(b"h", b"a", NOW), Lookup::Missing);
}

// =============================================================================
// Sorted-Set Index
// =============================================================================

fn zadd(f: &mut Feeder, key: &str, member: &str, score: f64) -> Location {
    f.apply(
        entry(EntryKind::Put, DataType::SortedSet, key)
            .with_member(member.as_bytes().to_vec())
            .with_value(encode_score(score)),
    )
}

#[test]
fn test_zset_score_order() {
    let mut f = Feeder::new(DataType::SortedSet);
    zadd(&mut f, "z", "carol", 3.0);
    zadd(&mut f, "z", "alice", 1.0);
    zadd(&mut f, "z", "bob", 2.0);
    zadd(&mut f, "z", "dave", -1.5);

    let zset = f.index.as_zset().unwrap();
    let members: Vec<(Vec<u8>, f64)> = zset.range_by_score(b"z", f64::NEG_INFINITY, f64::INFINITY, NOW);
    assert_eq!(
        members,
        vec![
            (b"dave".to_vec(), -1.5),
            (b"alice".to_vec(), 1.0),
            (b"bob".to_vec(), 2.0),
            (b"carol".to_vec(), 3.0),
        ]
    );
    assert_eq!(
        zset.range_by_score(b"z", 1.0, 2.0, NOW),
        vec![(b"alice".to_vec(), 1.0), (b"bob".to_vec(), 2.0)]
    );
    assert!(zset.range_by_score(b"z", 5.0, 1.0, NOW).is_empty());
}

#[test]
fn test_zset_update_moves_member() {
    let mut f = Feeder::new(DataType::SortedSet);
    zadd(&mut f, "z", "a", 1.0);
    zadd(&mut f, "z", "b", 2.0);
    zadd(&mut f, "z", "a", 3.0);

    let zset = f.index.as_zset().unwrap();
    assert_eq!(zset.score(b"z", b"a", NOW), Some(3.0));
    assert_eq!(
        zset.range_by_score(b"z", 0.0, 10.0, NOW),
        vec![(b"b".to_vec(), 2.0), (b"a".to_vec(), 3.0)]
    );
    assert_eq!(f.index.len(b"z", NOW), 2);
    assert_eq!(f.index.live_bytes(), 20);
}

#[test]
fn test_zset_equal_scores_ordered_by_member() {
    let mut f = Feeder::new(DataType::SortedSet);
    zadd(&mut f, "z", "y", 1.0);
    zadd(&mut f, "z", "x", 1.0);

    let targets = f.index.scan_targets(&ScanRange::All, NOW);
    assert_eq!(
        targets,
        vec![
            ScanTarget::Member { key: b"z".to_vec(), member: b"x".to_vec() },
            ScanTarget::Member { key: b"z".to_vec(), member: b"y".to_vec() },
        ]
    );
}

// =============================================================================
// Merge Support
// =============================================================================

#[test]
fn test_live_locations_and_relocate() {
    let mut f = Feeder::new(DataType::String);
    let stale = f.apply(entry(EntryKind::Put, DataType::String, "k"));
    let live = f.apply(entry(EntryKind::Put, DataType::String, "k"));
    let tombstone = f.apply(entry(EntryKind::Delete, DataType::String, "gone"));

    let locations = f.index.live_locations(NOW);
    assert!(locations.contains(&live));
    assert!(!locations.contains(&stale));
    assert!(!locations.contains(&tombstone));

    let moved = Location {
        segment_id: 7,
        offset: 0,
        len: 10,
    };
    let mut remap = Remap::new();
    remap.insert(live, moved);
    f.index.relocate(&remap);

    assert_eq!(found(f.index.get(b"k", b"", NOW)), moved);
}

#[test]
fn test_forget_drops_lost_records() {
    let mut f = Feeder::new(DataType::Hash);
    let kept = f.apply(entry(EntryKind::Put, DataType::Hash, "h").with_member(b"a".to_vec()));
    let lost = f.apply(entry(EntryKind::Put, DataType::Hash, "h").with_member(b"b".to_vec()));
    let only = f.apply(entry(EntryKind::Put, DataType::Hash, "g").with_member(b"x".to_vec()));
    let deadline = f.apply(entry(EntryKind::Expire, DataType::Hash, "h").with_expiry(9_000));

    let gone: HashSet<Location> = [lost, only, deadline].into_iter().collect();
    assert_eq!(f.index.forget(&gone), 3);

    assert_eq!(found(f.index.get(b"h", b"a", NOW)), kept);
    assert_eq!(f.index.get(b"h", b"b", NOW), Lookup::Missing);
    assert_eq!(f.index.key_state(b"h", NOW), KeyState::Live { expires_at: 0 });
    assert_eq!(f.index.key_state(b"g", NOW), KeyState::Missing);
    assert_eq!(f.index.live_bytes(), 10);
}

#[test]
fn test_apply_ignores_other_partitions() {
    let mut f = Feeder::new(DataType::String);
    f.apply(entry(EntryKind::Put, DataType::Hash, "k").with_member(b"m".to_vec()));

    assert_eq!(f.index.count(NOW), 0);
    assert_eq!(f.index.data_type(), DataType::String);
}
