//! Segment compaction.
//!
//! Once a snapshot covers every record below a composite offset, segments
//! wholly before that offset's segment are dead weight. Compaction deletes
//! them, always preserving a floor of the newest files so an operator can
//! inspect recent history even right after a snapshot.

use std::path::Path;
use tracing::info;

use tokmesh_core::error::Result;

use crate::offset::CompositeOffset;
use crate::wal::segment::{list_segment_ids, segment_path};

/// Delete segment files fully covered by `snapshot_offset`, keeping at least
/// the `retain_count` newest files. Returns how many files were removed.
pub fn compact_segments(
    dir: &Path,
    snapshot_offset: CompositeOffset,
    retain_count: usize,
) -> Result<usize> {
    let ids = list_segment_ids(dir)?;
    let cutoff = snapshot_offset.segment_id();

    let protected_from = ids.len().saturating_sub(retain_count);
    let mut removed = 0;
    for (idx, &id) in ids.iter().enumerate() {
        if id >= cutoff || idx >= protected_from {
            continue;
        }
        std::fs::remove_file(segment_path(dir, id))?;
        removed += 1;
    }

    if removed > 0 {
        info!(
            target: "tokmesh::wal",
            removed,
            cutoff,
            "compacted segments behind snapshot"
        );
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::record::WalRecord;
    use crate::wal::writer::{SegmentWriter, SyncPolicy};
    use tempfile::tempdir;

    fn build_segments(dir: &Path, records: u64) -> Vec<u32> {
        let mut writer = SegmentWriter::open(dir, 256, SyncPolicy::Sync).unwrap();
        for i in 0..records {
            writer
                .append(&WalRecord::delete(i as i64, &format!("tmss-{i}"), i))
                .unwrap();
        }
        writer.flush().unwrap();
        list_segment_ids(dir).unwrap()
    }

    #[test]
    fn deletes_segments_behind_snapshot() {
        let dir = tempdir().unwrap();
        let ids = build_segments(dir.path(), 60);
        assert!(ids.len() > 5, "need several segments, got {}", ids.len());

        let cutoff = ids[ids.len() - 2];
        let removed =
            compact_segments(dir.path(), CompositeOffset::new(cutoff, 8), 1).unwrap();
        assert!(removed > 0);

        let remaining = list_segment_ids(dir.path()).unwrap();
        assert!(remaining.iter().all(|&id| id >= cutoff || remaining.len() <= 1));
        assert!(remaining.contains(&cutoff));
    }

    #[test]
    fn retain_floor_preserves_newest_files() {
        let dir = tempdir().unwrap();
        let ids = build_segments(dir.path(), 60);
        let count = ids.len();

        // Snapshot covers everything, but the floor keeps 3 files
        let newest = *ids.last().unwrap();
        compact_segments(dir.path(), CompositeOffset::new(newest + 1, 8), 3).unwrap();

        let remaining = list_segment_ids(dir.path()).unwrap();
        assert_eq!(remaining.len(), 3.min(count));
        assert_eq!(remaining, ids[count - remaining.len()..].to_vec());
    }

    #[test]
    fn noop_when_snapshot_covers_nothing() {
        let dir = tempdir().unwrap();
        let ids = build_segments(dir.path(), 60);
        let removed = compact_segments(dir.path(), CompositeOffset::ZERO, 3).unwrap();
        assert_eq!(removed, 0);
        assert_eq!(list_segment_ids(dir.path()).unwrap(), ids);
    }
}
