//! Tests for segments and the segment log
//!
//! These tests verify:
//! - Append/read through locations
//! - Rotation at the size threshold and id monotonicity
//! - Ordered iteration across segments
//! - Reopen behavior and retirement

use std::fs;
use std::path::Path;

use bramblekv::log::{
    encoded_len, parse_segment_id, segment_path, Entry, EntryKind, LogItem, SegmentLog,
};
use bramblekv::{BrambleError, Config, DataType, IoMode};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config(mode: IoMode, segment_size: u64) -> Config {
    Config::builder()
        .io_mode(mode)
        .segment_size(segment_size)
        .build()
}

fn put(key: &str, value: &str) -> Entry {
    Entry::new(EntryKind::Put, DataType::String, key.as_bytes().to_vec())
        .with_value(value.as_bytes().to_vec())
}

fn entries(log: &SegmentLog) -> Vec<Entry> {
    log.iter_all()
        .filter_map(|item| match item.unwrap() {
            LogItem::Entry { entry, .. } => Some(entry),
            LogItem::SegmentEnd { .. } => None,
        })
        .collect()
}

fn segment_files(dir: &Path) -> Vec<u32> {
    let mut ids: Vec<u32> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| parse_segment_id(&e.unwrap().path()))
        .collect();
    ids.sort_unstable();
    ids
}

// =============================================================================
// Naming
// =============================================================================

#[test]
fn test_segment_path_round_trip() {
    let dir = Path::new("/tmp/p");
    let path = segment_path(dir, 42);

    assert_eq!(path, dir.join("000000042.seg"));
    assert_eq!(parse_segment_id(&path), Some(42));
    assert_eq!(parse_segment_id(Path::new("MERGE_MANIFEST")), None);
    assert_eq!(parse_segment_id(Path::new("abc.seg")), None);
}

// =============================================================================
// Append / Read
// =============================================================================

#[test]
fn test_append_and_read() {
    for mode in [IoMode::Buffered, IoMode::Mmap] {
        let dir = TempDir::new().unwrap();
        let mut log = SegmentLog::open(dir.path(), &config(mode, 1024 * 1024)).unwrap();

        let first = put("a", "1");
        let second = put("b", "2");
        let loc1 = log.append_active(&first).unwrap();
        let loc2 = log.append_active(&second).unwrap();

        assert_eq!(loc1.segment_id, 1);
        assert_eq!(loc1.offset, 0);
        assert_eq!(loc1.len as usize, encoded_len(&first));
        assert_eq!(loc2.offset, loc1.len as u64);

        assert_eq!(log.read(loc1).unwrap(), first);
        assert_eq!(log.read(loc2).unwrap(), second);
    }
}

#[test]
fn test_no_segment_until_first_write() {
    let dir = TempDir::new().unwrap();
    let log = SegmentLog::open(dir.path(), &config(IoMode::Buffered, 4096)).unwrap();

    assert_eq!(log.segment_count(), 0);
    assert_eq!(log.total_size(), 0);
    assert!(segment_files(dir.path()).is_empty());
}

#[test]
fn test_read_unknown_segment() {
    let dir = TempDir::new().unwrap();
    let mut log = SegmentLog::open(dir.path(), &config(IoMode::Buffered, 4096)).unwrap();
    let mut loc = log.append_active(&put("a", "1")).unwrap();
    loc.segment_id = 99;

    assert!(matches!(log.read(loc), Err(BrambleError::SegmentNotFound(99))));
}

// =============================================================================
// Rotation
// =============================================================================

#[test]
fn test_rotation_at_threshold() {
    for mode in [IoMode::Buffered, IoMode::Mmap] {
        let dir = TempDir::new().unwrap();
        let entry_len = encoded_len(&put("key000", "value000")) as u64;
        // Room for exactly three records per segment
        let mut log = SegmentLog::open(dir.path(), &config(mode, entry_len * 3)).unwrap();

        let mut locations = Vec::new();
        for i in 0..10 {
            let entry = put(&format!("key{:03}", i), &format!("value{:03}", i));
            locations.push(log.append_active(&entry).unwrap());
        }

        let ids: Vec<u32> = locations.iter().map(|l| l.segment_id).collect();
        assert_eq!(ids, vec![1, 1, 1, 2, 2, 2, 3, 3, 3, 4]);
        assert_eq!(log.segment_count(), 4);
        assert_eq!(log.sealed_ids(), vec![1, 2, 3]);
        assert_eq!(log.active_id(), Some(4));

        for segment in [1, 2, 3] {
            let size = fs::metadata(segment_path(dir.path(), segment)).unwrap().len();
            assert!(size <= entry_len * 3);
        }
    }
}

#[test]
fn test_entry_larger_than_segment_rejected() {
    let dir = TempDir::new().unwrap();
    let mut log = SegmentLog::open(dir.path(), &config(IoMode::Buffered, 128)).unwrap();

    let result = log.append_active(&put("k", &"x".repeat(500)));
    assert!(matches!(result, Err(BrambleError::EntryTooLarge { .. })));
    assert_eq!(log.segment_count(), 0);
}

// =============================================================================
// Iteration
// =============================================================================

#[test]
fn test_iter_all_in_write_order() {
    let dir = TempDir::new().unwrap();
    let entry_len = encoded_len(&put("k00", "v00")) as u64;
    let mut log = SegmentLog::open(dir.path(), &config(IoMode::Buffered, entry_len * 2)).unwrap();

    let written: Vec<Entry> = (0..7)
        .map(|i| put(&format!("k{:02}", i), &format!("v{:02}", i)))
        .collect();
    for entry in &written {
        log.append_active(entry).unwrap();
    }

    assert_eq!(entries(&log), written);
    // Iteration can start over
    assert_eq!(entries(&log).len(), 7);
}

#[test]
fn test_iter_reports_segment_ends() {
    let dir = TempDir::new().unwrap();
    let mut log = SegmentLog::open(dir.path(), &config(IoMode::Buffered, 4096)).unwrap();
    log.append_active(&put("a", "1")).unwrap();
    log.seal_active().unwrap();
    log.append_active(&put("b", "2")).unwrap();

    let ends: Vec<(u32, Option<String>)> = log
        .iter_all()
        .filter_map(|item| match item.unwrap() {
            LogItem::SegmentEnd {
                segment_id,
                valid_len,
                size,
                corruption,
            } => {
                assert_eq!(valid_len, size);
                Some((segment_id, corruption))
            }
            LogItem::Entry { .. } => None,
        })
        .collect();

    assert_eq!(ends, vec![(1, None), (2, None)]);
}

// =============================================================================
// Reopen / Retire
// =============================================================================

#[test]
fn test_reopen_continues_after_highest_id() {
    for mode in [IoMode::Buffered, IoMode::Mmap] {
        let dir = TempDir::new().unwrap();
        let cfg = config(mode, 4096);
        {
            let mut log = SegmentLog::open(dir.path(), &cfg).unwrap();
            log.append_active(&put("a", "1")).unwrap();
            log.seal_active().unwrap();
            log.append_active(&put("b", "2")).unwrap();
            log.close().unwrap();
        }

        let log = SegmentLog::open(dir.path(), &cfg).unwrap();
        assert_eq!(log.sealed_ids(), vec![1]);
        assert_eq!(log.active_id(), Some(2));
        assert_eq!(log.next_id(), 3);
        let keys: Vec<Vec<u8>> = entries(&log).into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
    }
}

#[test]
fn test_seal_active_forces_new_segment() {
    let dir = TempDir::new().unwrap();
    let mut log = SegmentLog::open(dir.path(), &config(IoMode::Buffered, 4096)).unwrap();

    log.append_active(&put("a", "1")).unwrap();
    assert_eq!(log.seal_active().unwrap(), Some(1));
    assert_eq!(log.seal_active().unwrap(), None);

    let loc = log.append_active(&put("b", "2")).unwrap();
    assert_eq!(loc.segment_id, 2);
}

#[test]
fn test_retire_deletes_files() {
    let dir = TempDir::new().unwrap();
    let mut log = SegmentLog::open(dir.path(), &config(IoMode::Buffered, 4096)).unwrap();

    log.append_active(&put("a", "1")).unwrap();
    log.seal_active().unwrap();
    log.append_active(&put("b", "2")).unwrap();
    log.seal_active().unwrap();
    log.append_active(&put("c", "3")).unwrap();

    log.retire(&[1, 2]).unwrap();

    assert_eq!(segment_files(dir.path()), vec![3]);
    assert_eq!(log.segment_ids(), vec![3]);
    // Ids are never reused
    log.seal_active().unwrap();
    assert_eq!(log.append_active(&put("d", "4")).unwrap().segment_id, 4);
}
