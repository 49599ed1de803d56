//! Segment files: naming, magic, and the seal trailer.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokmesh_core::error::{Error, Result};

/// Magic prefix identifying a WAL segment file.
pub const SEGMENT_MAGIC: &[u8; 8] = b"TOKMWAL\x01";

/// SHA-256 trailer length on sealed segments.
pub const TRAILER_SIZE: usize = 32;

/// Path of segment `id` within `dir`.
///
/// The ID is zero-padded decimal so lexicographic order equals numeric
/// order: `wal-0000000001.wal`.
pub fn segment_path(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("wal-{id:010}.wal"))
}

/// All segment IDs in `dir`, sorted ascending.
pub fn list_segment_ids(dir: &Path) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(id) = parse_segment_name(&name) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Parse `wal-<id>.wal`, returning the ID.
pub fn parse_segment_name(name: &str) -> Option<u32> {
    let body = name.strip_prefix("wal-")?.strip_suffix(".wal")?;
    if body.is_empty() || !body.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    body.parse().ok()
}

/// Examine raw segment bytes: validate the magic and detect a seal trailer.
///
/// Returns the record region of the file (everything between the magic and
/// the trailer, when one verifies) and whether the segment is sealed.
pub fn split_segment(bytes: &[u8], id: u32) -> Result<(&[u8], bool)> {
    if bytes.len() < SEGMENT_MAGIC.len() {
        return Err(Error::Corruption(format!(
            "segment {id} shorter than its magic ({} bytes)",
            bytes.len()
        )));
    }
    if &bytes[..SEGMENT_MAGIC.len()] != SEGMENT_MAGIC {
        return Err(Error::Corruption(format!("segment {id} has bad magic")));
    }

    if bytes.len() >= SEGMENT_MAGIC.len() + TRAILER_SIZE {
        let body_end = bytes.len() - TRAILER_SIZE;
        let digest = Sha256::digest(&bytes[..body_end]);
        if digest.as_slice() == &bytes[body_end..] {
            return Ok((&bytes[SEGMENT_MAGIC.len()..body_end], true));
        }
    }
    Ok((&bytes[SEGMENT_MAGIC.len()..], false))
}

/// Compute the seal trailer over `bytes` (magic plus records).
pub fn compute_trailer(bytes: &[u8]) -> [u8; TRAILER_SIZE] {
    Sha256::digest(bytes).into()
}
