//! Snapshot files.
//!
//! # File layout
//!
//! ```text
//! ┌────────────────────────────────┐
//! │ Magic "TOKMSNAP" (8 bytes)     │
//! ├────────────────────────────────┤
//! │ Header length (u32-be)         │
//! ├────────────────────────────────┤
//! │ JSON header                    │
//! ├────────────────────────────────┤
//! │ Body length (u32-be)           │
//! ├────────────────────────────────┤
//! │ Session body (JSON, optionally │
//! │ AEAD-sealed)                   │
//! ├────────────────────────────────┤
//! │ SHA-256 over all prior bytes   │
//! └────────────────────────────────┘
//! ```
//!
//! Creation is crash-safe: write to a dot-temp file, fsync, rename into
//! place, fsync the directory. Loading walks files newest-first and falls
//! back past any file whose checksum or framing fails, so one torn snapshot
//! never blocks recovery.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use tokmesh_core::cancel::CancelToken;
use tokmesh_core::config::encode_hex;
use tokmesh_core::error::{Error, Result};
use tokmesh_core::session::Session;
use tokmesh_core::time::now_millis;
use tokmesh_crypto::AeadCipher;

use crate::offset::CompositeOffset;

/// Magic prefix identifying a snapshot file.
pub const SNAPSHOT_MAGIC: &[u8; 8] = b"TOKMSNAP";

/// Snapshot format version written into headers.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// SHA-256 trailer length.
const TRAILER_SIZE: usize = 32;

/// Associated data binding snapshot ciphertexts to their purpose.
const SNAPSHOT_AAD: &[u8] = b"tokmesh-snapshot";

/// JSON header embedded in every snapshot file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Format version
    pub version: u32,
    /// Creation time, ms since epoch
    pub created_at: i64,
    /// Node that wrote the snapshot
    pub node_id: String,
    /// Sessions in the body
    pub session_count: u64,
    /// Composite WAL offset replay resumes from (raw packed form)
    pub wal_last_offset: u64,
    /// Whether the body is AEAD-sealed
    pub encrypted: bool,
    /// Hex salt for passphrase-derived keys; persisted so the snapshot
    /// stays decryptable after a restart
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf_salt: Option<String>,
}

/// Metadata of a snapshot on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    /// File path
    pub path: PathBuf,
    /// Creation time from the filename, ms since epoch
    pub created_at: i64,
    /// Tie-breaking sequence from the filename
    pub sequence: u64,
    /// Sessions in the body
    pub session_count: u64,
    /// Offset WAL replay resumes from
    pub wal_last_offset: CompositeOffset,
}

/// Writer/reader for the snapshot directory.
pub struct SnapshotManager {
    dir: PathBuf,
    node_id: String,
    cipher: Option<Arc<AeadCipher>>,
    kdf_salt: Option<[u8; 16]>,
    next_sequence: AtomicU64,
}

impl SnapshotManager {
    /// Open the snapshot directory, creating it and sweeping temp files
    /// left by crashes.
    pub fn open(
        dir: &Path,
        node_id: &str,
        cipher: Option<Arc<AeadCipher>>,
        kdf_salt: Option<[u8; 16]>,
    ) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let mut swept = 0;
        let mut max_sequence = 0;
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') && name.ends_with(".tmp") {
                std::fs::remove_file(entry.path())?;
                swept += 1;
            } else if let Some((_, sequence)) = parse_snapshot_name(&name) {
                max_sequence = max_sequence.max(sequence);
            }
        }
        if swept > 0 {
            info!(target: "tokmesh::snapshot", swept, "removed stale temp files");
        }

        Ok(SnapshotManager {
            dir: dir.to_path_buf(),
            node_id: node_id.to_string(),
            cipher,
            kdf_salt,
            next_sequence: AtomicU64::new(max_sequence + 1),
        })
    }

    /// Whether snapshots written by this manager are encrypted.
    pub fn encrypts(&self) -> bool {
        self.cipher.is_some()
    }

    /// Write a snapshot of `sessions` covering the WAL up to
    /// `wal_last_offset`.
    ///
    /// The caller must sample the durable WAL offset *before* copying the
    /// sessions: an offset ahead of the copy merely replays a few records
    /// twice, an offset behind durable state would lose acknowledged writes.
    pub fn create(
        &self,
        sessions: &[Session],
        wal_last_offset: CompositeOffset,
    ) -> Result<SnapshotInfo> {
        let created_at = now_millis();
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);

        let plain = serde_json::to_vec(sessions)?;
        let (body, encrypted) = match &self.cipher {
            Some(cipher) => (
                cipher
                    .encrypt(&plain, SNAPSHOT_AAD)
                    .map_err(|e| Error::Crypto(e.to_string()))?,
                true,
            ),
            None => (plain, false),
        };

        let header = SnapshotHeader {
            version: SNAPSHOT_FORMAT_VERSION,
            created_at,
            node_id: self.node_id.clone(),
            session_count: sessions.len() as u64,
            wal_last_offset: wal_last_offset.raw(),
            encrypted,
            kdf_salt: if encrypted {
                self.kdf_salt.map(|salt| encode_hex(&salt))
            } else {
                None
            },
        };
        let header_bytes = serde_json::to_vec(&header)?;

        let final_path = self.dir.join(snapshot_name(created_at, sequence));
        let temp_path = self
            .dir
            .join(format!(".snapshot-{created_at:013}-{sequence:06}.tmp"));

        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)?;
        let mut hasher = Sha256::new();

        {
            let mut write = |bytes: &[u8]| -> Result<()> {
                file.write_all(bytes)?;
                hasher.update(bytes);
                Ok(())
            };
            write(SNAPSHOT_MAGIC)?;
            write(&(header_bytes.len() as u32).to_be_bytes())?;
            write(&header_bytes)?;
            write(&(body.len() as u32).to_be_bytes())?;
            write(&body)?;
        }

        let digest: [u8; TRAILER_SIZE] = hasher.finalize().into();
        file.write_all(&digest)?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&temp_path, &final_path)?;
        File::open(&self.dir)?.sync_all()?;

        info!(
            target: "tokmesh::snapshot",
            path = %final_path.display(),
            sessions = sessions.len(),
            offset = %wal_last_offset,
            encrypted,
            "snapshot written"
        );
        Ok(SnapshotInfo {
            path: final_path,
            created_at,
            sequence,
            session_count: sessions.len() as u64,
            wal_last_offset,
        })
    }

    /// Snapshot files in chronological order (oldest first).
    pub fn list(&self) -> Result<Vec<(PathBuf, i64, u64)>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some((created_at, sequence)) = parse_snapshot_name(&name) {
                files.push((entry.path(), created_at, sequence));
            }
        }
        files.sort_by_key(|(_, created_at, sequence)| (*created_at, *sequence));
        Ok(files)
    }

    /// Load the newest intact snapshot.
    ///
    /// Checksum or framing failures fall through to the next older file; a
    /// body that needs a cipher this manager does not have (or that the
    /// configured cipher cannot open) is a hard error, because no older file
    /// would fix a key misconfiguration.
    pub fn load(&self, cancel: &CancelToken) -> Result<(Vec<Session>, SnapshotInfo)> {
        let mut files = self.list()?;
        files.reverse();

        for (path, created_at, sequence) in files {
            cancel.checkpoint()?;
            match self.read_file(&path) {
                Ok((header, sessions)) => {
                    return Ok((
                        sessions,
                        SnapshotInfo {
                            path,
                            created_at,
                            sequence,
                            session_count: header.session_count,
                            wal_last_offset: CompositeOffset::from_raw(header.wal_last_offset),
                        },
                    ));
                }
                Err(e @ (Error::Crypto(_) | Error::InvalidArgument(_))) => return Err(e),
                Err(e) => {
                    warn!(
                        target: "tokmesh::snapshot",
                        path = %path.display(),
                        error = %e,
                        "skipping unreadable snapshot"
                    );
                }
            }
        }
        Err(Error::NoSnapshots)
    }

    fn read_file(&self, path: &Path) -> Result<(SnapshotHeader, Vec<Session>)> {
        let bytes = std::fs::read(path)?;
        let magic_len = SNAPSHOT_MAGIC.len();
        if bytes.len() < magic_len + 4 + 4 + TRAILER_SIZE {
            return Err(Error::Corruption("snapshot shorter than its framing".into()));
        }

        let body_end = bytes.len() - TRAILER_SIZE;
        let digest = Sha256::digest(&bytes[..body_end]);
        if digest.as_slice() != &bytes[body_end..] {
            return Err(Error::Corruption("snapshot checksum mismatch".into()));
        }
        if &bytes[..magic_len] != SNAPSHOT_MAGIC {
            return Err(Error::Corruption("snapshot has bad magic".into()));
        }

        let header_len = BigEndian::read_u32(&bytes[magic_len..magic_len + 4]) as usize;
        let header_start = magic_len + 4;
        let header_end = header_start
            .checked_add(header_len)
            .filter(|&end| end + 4 <= body_end)
            .ok_or_else(|| Error::Corruption("snapshot header length out of range".into()))?;
        let header: SnapshotHeader = serde_json::from_slice(&bytes[header_start..header_end])?;

        let body_len = BigEndian::read_u32(&bytes[header_end..header_end + 4]) as usize;
        let body_start = header_end + 4;
        if body_start + body_len != body_end {
            return Err(Error::Corruption("snapshot body length out of range".into()));
        }
        let body = &bytes[body_start..body_end];

        let plain: Vec<u8> = if header.encrypted {
            let cipher = self.cipher.as_ref().ok_or_else(|| {
                Error::InvalidArgument(
                    "snapshot is encrypted but no cipher is configured".into(),
                )
            })?;
            cipher
                .decrypt(body, SNAPSHOT_AAD)
                .map_err(|e| Error::Crypto(format!("snapshot body: {e}")))?
        } else {
            body.to_vec()
        };

        let sessions: Vec<Session> = serde_json::from_slice(&plain)?;
        if sessions.len() as u64 != header.session_count {
            return Err(Error::Corruption(format!(
                "snapshot header claims {} sessions, body holds {}",
                header.session_count,
                sessions.len()
            )));
        }
        Ok((header, sessions))
    }

    /// Apply retention: keep the `keep_count` newest files plus anything
    /// newer than `keep_days`, and never remove the single newest. Returns
    /// how many files were deleted.
    pub fn prune(&self, keep_count: usize, keep_days: u32) -> Result<usize> {
        let files = self.list()?;
        if files.len() <= 1 {
            return Ok(0);
        }

        let age_floor = now_millis() - (keep_days as i64) * 24 * 3600 * 1000;
        let protected_from = files.len().saturating_sub(keep_count.max(1));

        let mut removed = 0;
        for (idx, (path, created_at, _)) in files.iter().enumerate() {
            let in_count_window = idx >= protected_from;
            let in_age_window = *created_at >= age_floor;
            let is_newest = idx == files.len() - 1;
            if is_newest || in_count_window || in_age_window {
                continue;
            }
            std::fs::remove_file(path)?;
            removed += 1;
        }
        if removed > 0 {
            info!(target: "tokmesh::snapshot", removed, "pruned old snapshots");
        }
        Ok(removed)
    }
}

fn snapshot_name(created_at: i64, sequence: u64) -> String {
    format!("snapshot-{created_at:013}-{sequence:06}.snap")
}

fn parse_snapshot_name(name: &str) -> Option<(i64, u64)> {
    let body = name.strip_prefix("snapshot-")?.strip_suffix(".snap")?;
    let (ts, seq) = body.split_once('-')?;
    Some((ts.parse().ok()?, seq.parse().ok()?))
}
