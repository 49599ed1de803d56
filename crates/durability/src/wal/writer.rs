//! Appending side of the WAL.

use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use tokmesh_core::error::{Error, Result};

use crate::offset::CompositeOffset;
use crate::wal::record::WalRecord;
use crate::wal::segment::{
    compute_trailer, list_segment_ids, segment_path, split_segment, SEGMENT_MAGIC,
};

/// When appended records are pushed to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Rely on the OS page cache
    None,
    /// fsync when `interval` has elapsed since the last sync, and on
    /// rotation; an external timer may also call `flush`
    Batch {
        /// Minimum time between append-triggered fsyncs
        interval: Duration,
    },
    /// fsync after every append
    Sync,
}

/// Single-owner writer for the active WAL segment.
///
/// On open it continues the newest segment when that segment is unsealed and
/// under the rotation threshold, otherwise it starts a fresh one. Exactly one
/// writer may exist per directory; the engine funnels all appends through
/// one worker thread.
pub struct SegmentWriter {
    dir: PathBuf,
    file: File,
    segment_id: u32,
    /// Bytes written to the active segment, magic included
    position: u64,
    /// Running digest over every byte written, feeds the seal trailer
    trailer_hasher: Sha256,
    max_file_size: u64,
    policy: SyncPolicy,
    last_sync: Instant,
    dirty: bool,
}

impl SegmentWriter {
    /// Open the WAL in `dir`, creating the directory and the first segment
    /// as needed.
    pub fn open(dir: &Path, max_file_size: u64, policy: SyncPolicy) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let ids = list_segment_ids(dir)?;
        if let Some(&newest) = ids.last() {
            let path = segment_path(dir, newest);
            let bytes = std::fs::read(&path)?;

            let continue_active = match split_segment(&bytes, newest) {
                Ok((_, sealed)) => !sealed && (bytes.len() as u64) < max_file_size,
                // Recovery truncates damaged tails before the writer opens;
                // a segment that still fails here was sealed out from under
                // us or the directory is shared.
                Err(_) if bytes.is_empty() => true,
                Err(e) => return Err(e),
            };

            if continue_active {
                let mut file = OpenOptions::new().append(true).open(&path)?;
                let mut hasher = Sha256::new();
                let mut position = bytes.len() as u64;
                if bytes.is_empty() {
                    file.write_all(SEGMENT_MAGIC)?;
                    hasher.update(SEGMENT_MAGIC);
                    position = SEGMENT_MAGIC.len() as u64;
                } else {
                    hasher.update(&bytes);
                }
                debug!(
                    target: "tokmesh::wal",
                    segment = newest,
                    position,
                    "continuing active segment"
                );
                return Ok(SegmentWriter {
                    dir: dir.to_path_buf(),
                    file,
                    segment_id: newest,
                    position,
                    trailer_hasher: hasher,
                    max_file_size,
                    policy,
                    last_sync: Instant::now(),
                    dirty: false,
                });
            }

            return Self::create(dir, newest + 1, max_file_size, policy);
        }

        Self::create(dir, 1, max_file_size, policy)
    }

    fn create(dir: &Path, id: u32, max_file_size: u64, policy: SyncPolicy) -> Result<Self> {
        let path = segment_path(dir, id);
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)?;
        file.write_all(SEGMENT_MAGIC)?;

        let mut hasher = Sha256::new();
        hasher.update(SEGMENT_MAGIC);

        info!(target: "tokmesh::wal", segment = id, "opened new segment");
        Ok(SegmentWriter {
            dir: dir.to_path_buf(),
            file,
            segment_id: id,
            position: SEGMENT_MAGIC.len() as u64,
            trailer_hasher: hasher,
            max_file_size,
            policy,
            last_sync: Instant::now(),
            dirty: false,
        })
    }

    /// Append one record, returning the composite offset immediately after
    /// it. Rotation happens after the append when the segment crossed the
    /// threshold, so the returned offset always refers to the segment the
    /// record landed in.
    pub fn append(&mut self, record: &WalRecord) -> Result<CompositeOffset> {
        let frame = record.encode()?;
        if self.position + frame.len() as u64 > u32::MAX as u64 {
            return Err(Error::Internal(format!(
                "segment {} would exceed the 4 GiB offset space",
                self.segment_id
            )));
        }

        self.file.write_all(&frame)?;
        self.trailer_hasher.update(&frame);
        self.position += frame.len() as u64;
        self.dirty = true;

        let offset = CompositeOffset::new(self.segment_id, self.position as u32);

        match self.policy {
            SyncPolicy::Sync => self.flush()?,
            SyncPolicy::Batch { interval } => {
                if self.last_sync.elapsed() >= interval {
                    self.flush()?;
                }
            }
            SyncPolicy::None => {}
        }

        if self.position >= self.max_file_size {
            self.rotate()?;
        }

        Ok(offset)
    }

    /// Force all appended bytes to stable storage.
    pub fn flush(&mut self) -> Result<()> {
        if self.dirty {
            self.file.sync_data()?;
            self.dirty = false;
        }
        self.last_sync = Instant::now();
        Ok(())
    }

    /// Seal the active segment (trailer + fsync) and open the next one.
    fn rotate(&mut self) -> Result<()> {
        self.seal_active()?;
        let sealed_id = self.segment_id;
        let next = Self::create(&self.dir, sealed_id + 1, self.max_file_size, self.policy)?;
        // The old file handle closes when the replaced writer drops.
        let _sealed = std::mem::replace(self, next);
        info!(
            target: "tokmesh::wal",
            sealed = sealed_id,
            active = self.segment_id,
            "rotated segment"
        );
        Ok(())
    }

    /// Write the SHA-256 trailer over everything appended so far and fsync.
    fn seal_active(&mut self) -> Result<()> {
        let digest: [u8; 32] = self.trailer_hasher.clone().finalize().into();
        self.file.write_all(&digest)?;
        self.file.sync_all()?;
        self.dirty = false;
        Ok(())
    }

    /// Offset one byte past the last appended record.
    pub fn current_offset(&self) -> CompositeOffset {
        CompositeOffset::new(self.segment_id, self.position as u32)
    }

    /// ID of the active segment.
    pub fn active_segment(&self) -> u32 {
        self.segment_id
    }

    /// Total bytes across every segment file in the directory.
    pub fn total_size(&self) -> Result<u64> {
        let mut total = 0;
        for id in list_segment_ids(&self.dir)? {
            total += std::fs::metadata(segment_path(&self.dir, id))?.len();
        }
        Ok(total)
    }

    /// Flush and seal the active segment. Called on clean shutdown so every
    /// segment on disk carries a trailer.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        self.seal_active()?;
        info!(target: "tokmesh::wal", segment = self.segment_id, "sealed on close");
        Ok(())
    }
}

/// Recompute and verify the trailer of the file at `path` (test support and
/// offline tooling).
pub fn verify_sealed(path: &Path) -> Result<bool> {
    let bytes = std::fs::read(path)?;
    if bytes.len() < SEGMENT_MAGIC.len() + 32 {
        return Ok(false);
    }
    let body_end = bytes.len() - 32;
    Ok(compute_trailer(&bytes[..body_end]).as_slice() == &bytes[body_end..])
}
