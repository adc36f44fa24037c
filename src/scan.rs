//! Lazy partition scans

use crate::error::Result;
use crate::index::{Lookup, ScanTarget};
use crate::log::now_millis;
use crate::partition::Partition;

/// One item produced by a scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScanEntry {
    pub key: Vec<u8>,
    /// Hash field, set element or sorted-set member; `None` for strings and lists
    pub member: Option<Vec<u8>>,
    /// String value, hash value, list element, encoded sorted-set score
    /// (empty for sets)
    pub value: Vec<u8>,
}

/// Iterator over the live entries of a partition
///
/// The set of targets is fixed when the scan starts; each one is looked up
/// again right before it is produced, under the partition's read lock. Targets
/// deleted or expired in between are skipped, and a merge running
/// concurrently is invisible to the caller.
pub struct Scan<'a> {
    partition: &'a Partition,
    targets: std::vec::IntoIter<ScanTarget>,
}

impl<'a> Scan<'a> {
    pub(crate) fn new(partition: &'a Partition, targets: Vec<ScanTarget>) -> Self {
        Self {
            partition,
            targets: targets.into_iter(),
        }
    }

    /// Targets not yet visited (upper bound on the items left)
    pub fn remaining(&self) -> usize {
        self.targets.len()
    }
}

impl<'a> Iterator for Scan<'a> {
    type Item = Result<ScanEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        for target in self.targets.by_ref() {
            let state = self.partition.read();
            let location = match state.index.resolve(&target, now_millis()) {
                Lookup::Found(found) => found.location,
                Lookup::Expired | Lookup::Missing => continue,
            };
            let entry = match state.log.read(location) {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };

            let member = match target {
                ScanTarget::Member { member, .. } => Some(member),
                ScanTarget::Key(_) | ScanTarget::Element { .. } => None,
            };
            return Some(Ok(ScanEntry {
                key: entry.key,
                member,
                value: entry.value,
            }));
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.targets.len()))
    }
}
