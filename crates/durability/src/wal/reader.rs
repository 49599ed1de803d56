//! Replay side of the WAL.

use std::path::{Path, PathBuf};
use tracing::warn;

use tokmesh_core::cancel::CancelToken;
use tokmesh_core::error::{Error, Result};

use crate::offset::CompositeOffset;
use crate::wal::record::{FrameError, WalRecord};
use crate::wal::segment::{list_segment_ids, segment_path, split_segment, SEGMENT_MAGIC};

/// A damaged tail found in the active segment. Recovery truncates the file
/// to `valid_len` before the writer reopens it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailTruncation {
    /// Segment holding the damaged tail
    pub segment_id: u32,
    /// File length up to and including the last intact record
    pub valid_len: u64,
}

/// Outcome of a replay pass.
#[derive(Debug, Clone)]
pub struct ReplaySummary {
    /// Records handed to the visitor
    pub records: u64,
    /// Offset one byte past the last intact record seen
    pub last_offset: CompositeOffset,
    /// Damage found at the active segment's tail, if any
    pub truncation: Option<TailTruncation>,
    /// Segments visited
    pub segments: usize,
}

/// Reader that walks segments in ID order from a composite offset.
pub struct SegmentReader {
    dir: PathBuf,
}

impl SegmentReader {
    /// Reader over the WAL directory at `dir`.
    pub fn new(dir: &Path) -> Self {
        SegmentReader { dir: dir.to_path_buf() }
    }

    /// Replay every record at or after `from`, in durable order.
    ///
    /// The visitor receives each record together with the composite offset
    /// one byte past it (the value a snapshot taken after this record would
    /// carry). Framing damage in the final, unsealed segment terminates the
    /// walk and is reported through `truncation`; damage anywhere else is a
    /// `Corruption` error because sealed history must be intact.
    pub fn replay<F>(
        &self,
        from: CompositeOffset,
        cancel: &CancelToken,
        mut visit: F,
    ) -> Result<ReplaySummary>
    where
        F: FnMut(WalRecord, CompositeOffset) -> Result<()>,
    {
        let ids = list_segment_ids(&self.dir)?;
        let mut summary = ReplaySummary {
            records: 0,
            last_offset: from,
            truncation: None,
            segments: 0,
        };

        let relevant: Vec<u32> = ids.into_iter().filter(|&id| id >= from.segment_id()).collect();
        for (idx, &id) in relevant.iter().enumerate() {
            let is_last = idx == relevant.len() - 1;
            let bytes = std::fs::read(segment_path(&self.dir, id))?;
            summary.segments += 1;

            let (body, sealed) = match split_segment(&bytes, id) {
                Ok(split) => split,
                Err(e) if is_last => {
                    // Crash between segment creation and the magic write
                    // leaves a stub; recovery discards it.
                    warn!(
                        target: "tokmesh::recovery",
                        segment = id,
                        error = %e,
                        "discarding stub active segment"
                    );
                    summary.truncation = Some(TailTruncation { segment_id: id, valid_len: 0 });
                    break;
                }
                Err(e) => return Err(e),
            };
            let body_end = SEGMENT_MAGIC.len() + body.len();

            let mut pos = if id == from.segment_id() {
                (from.offset() as usize).max(SEGMENT_MAGIC.len())
            } else {
                SEGMENT_MAGIC.len()
            };
            if pos > body_end {
                return Err(Error::Corruption(format!(
                    "replay offset {pos} beyond segment {id} length {body_end}"
                )));
            }

            while pos < body_end {
                cancel.checkpoint()?;
                match WalRecord::decode(&bytes[pos..body_end]) {
                    Ok((record, consumed)) => {
                        pos += consumed;
                        let offset = CompositeOffset::new(id, pos as u32);
                        visit(record, offset)?;
                        summary.records += 1;
                        summary.last_offset = offset;
                    }
                    Err(frame_err) => {
                        if sealed {
                            return Err(Error::Corruption(format!(
                                "sealed segment {id} damaged at byte {pos}: {frame_err}"
                            )));
                        }
                        if !is_last {
                            return Err(Error::Corruption(format!(
                                "segment {id} damaged mid-stream at byte {pos}: {frame_err}"
                            )));
                        }
                        // Partial tail append from a crash: everything up to
                        // `pos` is intact, the rest is garbage.
                        warn!(
                            target: "tokmesh::recovery",
                            segment = id,
                            valid_len = pos,
                            error = %frame_err,
                            "truncating damaged tail of active segment"
                        );
                        summary.truncation =
                            Some(TailTruncation { segment_id: id, valid_len: pos as u64 });
                        return Ok(summary);
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Apply a tail truncation found by [`replay`](Self::replay).
    ///
    /// A `valid_len` of zero removes the stub file entirely so the writer
    /// recreates the segment from scratch.
    pub fn truncate_tail(&self, truncation: &TailTruncation) -> Result<()> {
        let path = segment_path(&self.dir, truncation.segment_id);
        if truncation.valid_len == 0 {
            std::fs::remove_file(&path)?;
            return Ok(());
        }
        let file = std::fs::OpenOptions::new().write(true).open(&path)?;
        file.set_len(truncation.valid_len)?;
        file.sync_all()?;
        Ok(())
    }
}
