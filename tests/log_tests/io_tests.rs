//! Tests for the segment I/O backends
//!
//! Both backends run through the same contract checks, plus a few
//! backend-specific ones (buffer flushing, preallocation).

use std::fs;

use bramblekv::log::io::{open_backend, BufferedFile, IoBackend, MmapFile};
use bramblekv::IoMode;
use tempfile::TempDir;

const CAPACITY: u64 = 4096;

fn both_modes() -> [IoMode; 2] {
    [IoMode::Buffered, IoMode::Mmap]
}

// =============================================================================
// Shared Contract
// =============================================================================

#[test]
fn test_append_returns_sequential_offsets() {
    for mode in both_modes() {
        let dir = TempDir::new().unwrap();
        let mut file = open_backend(&dir.path().join("a.seg"), mode, CAPACITY, true).unwrap();

        assert_eq!(file.append(b"hello").unwrap(), 0);
        assert_eq!(file.append(b"world!").unwrap(), 5);
        assert_eq!(file.size(), 11);
    }
}

#[test]
fn test_read_back_before_sync() {
    for mode in both_modes() {
        let dir = TempDir::new().unwrap();
        let mut file = open_backend(&dir.path().join("a.seg"), mode, CAPACITY, true).unwrap();

        file.append(b"abc").unwrap();
        file.append(b"defgh").unwrap();

        assert_eq!(file.read_at(0, 3).unwrap(), b"abc");
        assert_eq!(file.read_at(3, 5).unwrap(), b"defgh");
        assert_eq!(file.read_at(2, 3).unwrap(), b"cde");
    }
}

#[test]
fn test_read_past_end_fails() {
    for mode in both_modes() {
        let dir = TempDir::new().unwrap();
        let mut file = open_backend(&dir.path().join("a.seg"), mode, CAPACITY, true).unwrap();
        file.append(b"abc").unwrap();

        assert!(file.read_at(1, 10).is_err(), "{:?}", mode);
    }
}

#[test]
fn test_sync_then_reopen() {
    for mode in both_modes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.seg");
        {
            let mut file = open_backend(&path, mode, CAPACITY, true).unwrap();
            file.append(b"persisted").unwrap();
            file.sync().unwrap();
            file.seal().unwrap();
        }

        let file = open_backend(&path, mode, CAPACITY, false).unwrap();
        assert_eq!(file.size(), 9);
        assert_eq!(file.read_at(0, 9).unwrap(), b"persisted");
    }
}

#[test]
fn test_truncate_drops_tail() {
    for mode in both_modes() {
        let dir = TempDir::new().unwrap();
        let mut file = open_backend(&dir.path().join("a.seg"), mode, CAPACITY, true).unwrap();
        file.append(b"keepdrop").unwrap();

        file.truncate(4).unwrap();
        assert_eq!(file.size(), 4);
        assert_eq!(file.read_at(0, 4).unwrap(), b"keep");
        assert!(file.read_at(0, 8).is_err());

        assert_eq!(file.append(b"more").unwrap(), 4);
        assert_eq!(file.read_at(0, 8).unwrap(), b"keepmore");
    }
}

// =============================================================================
// Buffered Backend
// =============================================================================

#[test]
fn test_buffered_large_append_spills_to_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.seg");
    let mut file = BufferedFile::open(&path).unwrap();

    let chunk = vec![3u8; 100 * 1024];
    file.append(&chunk).unwrap();

    // Larger than the buffer: already handed to the OS
    assert_eq!(fs::metadata(&path).unwrap().len(), chunk.len() as u64);
    assert_eq!(file.read_at(50_000, 10).unwrap(), vec![3u8; 10]);
}

#[test]
fn test_buffered_seal_flushes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.seg");
    let mut file = BufferedFile::open(&path).unwrap();

    file.append(b"small").unwrap();
    file.seal().unwrap();

    assert_eq!(fs::read(&path).unwrap(), b"small");
}

/// `/dev/full` rejects every write with ENOSPC
#[cfg(target_os = "linux")]
#[test]
fn test_buffered_failed_flush_rolls_back_append() {
    let path = std::path::Path::new("/dev/full");
    if !path.exists() {
        return;
    }
    let mut file = BufferedFile::open(path).unwrap();

    assert_eq!(file.append(b"abc").unwrap(), 0);
    assert!(file.append(&vec![7u8; 64 * 1024]).is_err());

    // The failed record is gone; earlier appends are still pending
    assert_eq!(file.size(), 3);
    assert_eq!(file.read_at(0, 3).unwrap(), b"abc");
    assert_eq!(file.append(b"de").unwrap(), 3);
    assert_eq!(file.read_at(0, 5).unwrap(), b"abcde");
    assert!(file.sync().is_err());
    assert_eq!(file.size(), 5);
}

// =============================================================================
// Mmap Backend
// =============================================================================

#[test]
fn test_mmap_preallocates_and_seal_shrinks() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.seg");
    let mut file = MmapFile::open(&path, CAPACITY, true).unwrap();

    assert_eq!(fs::metadata(&path).unwrap().len(), CAPACITY);

    file.append(b"mapped").unwrap();
    file.seal().unwrap();

    assert_eq!(fs::metadata(&path).unwrap().len(), 6);
    assert_eq!(file.read_at(0, 6).unwrap(), b"mapped");
}

#[test]
fn test_mmap_append_past_capacity_fails() {
    let dir = TempDir::new().unwrap();
    let mut file = MmapFile::open(&dir.path().join("a.seg"), 16, true).unwrap();

    file.append(&[1u8; 10]).unwrap();
    assert!(file.append(&[2u8; 10]).is_err());
    assert_eq!(file.size(), 10);
}

#[test]
fn test_mmap_truncate_zeroes_tail() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.seg");
    {
        let mut file = MmapFile::open(&path, CAPACITY, true).unwrap();
        file.append(b"abcdefgh").unwrap();
        file.truncate(3).unwrap();
        file.sync().unwrap();
    }

    let bytes = fs::read(&path).unwrap();
    assert_eq!(&bytes[..3], b"abc");
    assert!(bytes[3..].iter().all(|&b| b == 0));
}
