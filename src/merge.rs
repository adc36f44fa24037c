//! Merge Compactor
//!
//! Rewrites the live records of a partition into fresh segments and retires
//! the segments they came from.
//!
//! ## Protocol
//! ```text
//! 1. gate      writers blocked for the whole merge, readers keep going
//! 2. seal      active segment sealed; expired records evicted; live set taken
//! 3. rewrite   live records copied, in log order, to {partition}/merge/
//! 4. commit    MERGE_MANIFEST (outputs + retired ids) renamed into place
//! 5. install   outputs moved into the partition, index repointed,
//!              retired segments deleted, manifest removed
//! ```
//!
//! A crash before step 4 leaves the old segments authoritative and the staging
//! directory is thrown away on the next open. A crash after step 4 is rolled
//! forward on the next open by [`resume`].
//!
//! Output segments take ids from the partition counter while writers are
//! blocked, so they sort after every retired segment and before the next
//! active one. Replay order is preserved.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::IoMode;
use crate::error::{BrambleError, Result};
use crate::index::{Location, Remap};
use crate::log::{encode, now_millis, segment_path, LogItem, Segment, SegmentLog};
use crate::partition::Partition;

/// Commit record of a merge
pub const MANIFEST_FILE: &str = "MERGE_MANIFEST";

/// Manifest being written, not yet committed
const MANIFEST_TMP: &str = "MERGE_MANIFEST.tmp";

/// Where output segments are built
pub const STAGING_DIR: &str = "merge";

/// What a committed merge replaces with what
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeManifest {
    /// New segment ids, waiting in the staging directory
    pub outputs: Vec<u32>,
    /// Old segment ids to delete
    pub retired: Vec<u32>,
}

impl MergeManifest {
    /// Durably write the manifest into `dir`; the final rename commits it
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        let bytes = bincode::serialize(self)?;
        let tmp = dir.join(MANIFEST_TMP);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
        sync_dir(dir);
        Ok(())
    }

    /// The committed manifest in `dir`, if there is one
    pub fn read_from(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(Some(bincode::deserialize(&bytes)?))
    }
}

/// Result of a merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Segments retired
    pub segments_merged: usize,
    /// Live records copied
    pub entries_rewritten: u64,
    /// Records left behind (superseded, deleted, expired, tombstones)
    pub entries_dropped: u64,
    /// Live records that could not be read back and were dropped
    pub entries_lost: u64,
    /// Size of the retired segments
    pub bytes_before: u64,
    /// Size of the output segments
    pub bytes_after: u64,
    pub output_segments: usize,
}

/// Output of the rewrite phase
struct Rewrite {
    outputs: Vec<u32>,
    remap: Remap,
    entries_rewritten: u64,
    entries_dropped: u64,
    bytes_after: u64,
}

/// Merge every sealed segment of `partition`
///
/// Holds the partition's write gate until the new segments are installed.
/// Any failure before the commit leaves the partition as it was. A failure
/// after it keeps the old segments in use and leaves the manifest for the
/// next open to roll forward; merges of the partition are refused until then.
pub fn run(partition: &Partition) -> Result<MergeStats> {
    let _gate = partition.gate();
    let now = now_millis();

    let (dir, retired, live, bytes_before) = {
        let mut state = partition.state_mut();
        if state.log.dir().join(MANIFEST_FILE).exists() {
            return Err(BrambleError::Merge(format!(
                "a committed merge of the {} partition is not installed yet; reopen to finish it",
                partition.data_type()
            )));
        }
        state.log.seal_active()?;
        let evicted = state.index.evict_expired(now);
        if evicted > 0 {
            tracing::debug!("Evicted {} expired records before merge", evicted);
        }
        let retired = state.log.sealed_ids();
        let live = state.index.live_locations(now);
        (
            state.log.dir().to_path_buf(),
            retired,
            live,
            state.log.total_size(),
        )
    };

    if retired.is_empty() {
        return Ok(MergeStats::default());
    }

    let staging = dir.join(STAGING_DIR);
    let rewrite = {
        let state = partition.read();
        rewrite(&state.log, &retired, &live, &staging)
    };
    let rewrite = match rewrite {
        Ok(rewrite) => rewrite,
        Err(e) => {
            discard_staging(&staging);
            return Err(e);
        }
    };

    // Live records the rewrite could not read (corrupt tail) are gone for good
    let lost: HashSet<Location> = live
        .iter()
        .filter(|location| !rewrite.remap.contains_key(*location))
        .copied()
        .collect();

    let manifest = MergeManifest {
        outputs: rewrite.outputs.clone(),
        retired: retired.clone(),
    };
    if let Err(e) = manifest.write_to(&dir) {
        let _ = fs::remove_file(dir.join(MANIFEST_TMP));
        discard_staging(&staging);
        return Err(e);
    }

    {
        let mut state = partition.state_mut();
        if !lost.is_empty() {
            let forgotten = state.index.forget(&lost);
            tracing::warn!(
                "Dropped {} unreadable records of the {} partition",
                forgotten,
                partition.data_type()
            );
        }

        let installed = move_outputs(&dir, &staging, &manifest.outputs)
            .and_then(|()| state.log.install(&manifest.outputs));
        if let Err(e) = installed {
            tracing::error!(
                "Merge of {} partition committed but not installed: {}",
                partition.data_type(),
                e
            );
            return Err(e);
        }
        state.index.relocate(&rewrite.remap);

        if let Err(e) = state.log.retire(&manifest.retired) {
            tracing::warn!("Retired segments left on disk until the next open: {}", e);
        } else if let Err(e) = finish(&dir, &staging) {
            tracing::warn!("Failed to remove the merge manifest: {}", e);
        }
    }

    let stats = MergeStats {
        segments_merged: retired.len(),
        entries_rewritten: rewrite.entries_rewritten,
        entries_dropped: rewrite.entries_dropped,
        entries_lost: lost.len() as u64,
        bytes_before,
        bytes_after: rewrite.bytes_after,
        output_segments: manifest.outputs.len(),
    };
    tracing::info!(
        "Merged {} partition: {} segments -> {}, {} -> {} bytes, {} records dropped",
        partition.data_type(),
        stats.segments_merged,
        stats.output_segments,
        stats.bytes_before,
        stats.bytes_after,
        stats.entries_dropped
    );
    Ok(stats)
}

/// Move staged outputs into the partition directory; already moved ones are
/// skipped
fn move_outputs(dir: &Path, staging: &Path, outputs: &[u32]) -> Result<()> {
    for &id in outputs {
        let staged = segment_path(staging, id);
        if staged.exists() {
            fs::rename(staged, segment_path(dir, id))?;
        }
    }
    Ok(())
}

/// Copy live records of `retired` into new segments under `staging`
fn rewrite(
    log: &SegmentLog,
    retired: &[u32],
    live: &HashSet<Location>,
    staging: &Path,
) -> Result<Rewrite> {
    if staging.exists() {
        fs::remove_dir_all(staging)?;
    }
    fs::create_dir_all(staging)?;

    let mut result = Rewrite {
        outputs: Vec::new(),
        remap: Remap::with_capacity(live.len()),
        entries_rewritten: 0,
        entries_dropped: 0,
        bytes_after: 0,
    };
    let mut current: Option<Segment> = None;

    for item in log.iter_segments(retired) {
        match item? {
            LogItem::Entry { location, entry } => {
                if !live.contains(&location) {
                    result.entries_dropped += 1;
                    continue;
                }

                let bytes = encode(&entry);
                let len = bytes.len() as u64;
                let full = current
                    .as_ref()
                    .map_or(true, |s| s.size() + len > log.segment_size());
                if full {
                    if let Some(segment) = current.take() {
                        close_output(segment, &mut result)?;
                    }
                    let id = log.allocate_id();
                    current = Some(Segment::open(
                        staging,
                        id,
                        IoMode::Buffered,
                        log.segment_size(),
                        true,
                    )?);
                }

                if let Some(segment) = current.as_mut() {
                    let offset = segment.append(&bytes)?;
                    let moved = Location {
                        segment_id: segment.id(),
                        offset,
                        len: location.len,
                    };
                    result.remap.insert(location, moved);
                    result.entries_rewritten += 1;
                }
            }
            LogItem::SegmentEnd {
                segment_id,
                valid_len,
                corruption: Some(reason),
                ..
            } => {
                tracing::warn!(
                    "Segment {} is corrupt at offset {} ({}); its tail is not merged",
                    segment_id,
                    valid_len,
                    reason
                );
            }
            LogItem::SegmentEnd { .. } => {}
        }
    }

    if let Some(segment) = current.take() {
        close_output(segment, &mut result)?;
    }
    sync_dir(staging);
    Ok(result)
}

fn close_output(mut segment: Segment, result: &mut Rewrite) -> Result<()> {
    segment.seal()?;
    result.bytes_after += segment.size();
    result.outputs.push(segment.id());
    Ok(())
}

/// Finish or discard a merge interrupted by a crash
///
/// Called on open, before the log is loaded. A committed manifest is rolled
/// forward; a staging directory without one is deleted. Returns whether a
/// merge was rolled forward.
pub fn resume(dir: &Path) -> Result<bool> {
    let staging = dir.join(STAGING_DIR);

    let Some(manifest) = MergeManifest::read_from(dir)? else {
        if staging.exists() {
            tracing::warn!("Discarding uncommitted merge output in {}", staging.display());
            fs::remove_dir_all(&staging)?;
        }
        let tmp = dir.join(MANIFEST_TMP);
        if tmp.exists() {
            fs::remove_file(tmp)?;
        }
        return Ok(false);
    };

    move_outputs(dir, &staging, &manifest.outputs)?;
    for &id in &manifest.retired {
        let path = segment_path(dir, id);
        if path.exists() {
            fs::remove_file(path)?;
        }
    }
    finish(dir, &staging)?;

    tracing::info!(
        "Rolled forward interrupted merge in {}: {} segments installed, {} retired",
        dir.display(),
        manifest.outputs.len(),
        manifest.retired.len()
    );
    Ok(true)
}

/// Remove the manifest and the (now empty) staging directory
fn finish(dir: &Path, staging: &Path) -> Result<()> {
    fs::remove_file(dir.join(MANIFEST_FILE))?;
    if staging.exists() {
        fs::remove_dir_all(staging)?;
    }
    sync_dir(dir);
    Ok(())
}

fn discard_staging(staging: &Path) {
    if let Err(e) = fs::remove_dir_all(staging) {
        tracing::warn!("Failed to clean up merge staging {}: {}", staging.display(), e);
    }
}

/// Persist directory entries (renames); not supported everywhere
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}
