//! The storage engine: durability and memory, wired together.

use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use tokmesh_core::cancel::CancelToken;
use tokmesh_core::config::{encode_hex, Config, CryptoAlgorithm, SyncMode};
use tokmesh_core::error::{Error, Result};
use tokmesh_core::filter::{SessionFilter, SessionPage};
use tokmesh_core::session::Session;
use tokmesh_core::time::now_millis;
use tokmesh_crypto::kdf;
use tokmesh_crypto::{AeadAlgorithm, AeadCipher};
use tokmesh_durability::wal::{
    compact_segments, SegmentReader, SegmentWriter, SyncPolicy, WalOp, WalRecord,
};
use tokmesh_durability::{CompositeOffset, SnapshotManager};
use tokmesh_storage::{SessionStore, StoreStats};

use crate::wal_worker::{WalHandle, WalWorker};
use crate::workers::{spawn_ticker, Shutdown};

/// Default hard deadline for shutdown.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// Counters describing the engine and its on-disk state.
#[derive(Debug, Clone)]
pub struct EngineStats {
    /// Shape of the in-memory store
    pub store: StoreStats,
    /// Bytes across all WAL segment files
    pub wal_total_bytes: u64,
    /// Snapshot files on disk
    pub snapshot_count: usize,
    /// Offset covered by the most recent snapshot, if any was taken
    pub last_snapshot_offset: Option<CompositeOffset>,
    /// Records replayed during the last recovery
    pub replayed_records: u64,
}

/// Everything a snapshot pass needs, shared with the scheduler worker.
struct SnapshotContext {
    store: Arc<SessionStore>,
    wal: WalHandle,
    wal_dir: PathBuf,
    snapshots: Arc<SnapshotManager>,
    interval: Duration,
    wal_threshold: u64,
    retain_count: usize,
    retention_count: usize,
    retention_days: u32,
    /// Serializes snapshot passes and remembers when the last one ran
    state: Mutex<Instant>,
    last_offset: AtomicU64,
    has_snapshot: AtomicBool,
}

impl SnapshotContext {
    /// Run a snapshot pass when due (or forced): sample the durable WAL
    /// offset, copy the sessions, write the snapshot, compact, prune.
    fn run(&self, force: bool) -> Result<bool> {
        let mut last_run = self.state.lock();

        if !force {
            let due_by_time = last_run.elapsed() >= self.interval;
            let due_by_size = self.wal.total_size()? >= self.wal_threshold;
            if !due_by_time && !due_by_size {
                return Ok(false);
            }
        }

        // Offset first, copy second: anything written between the two is
        // simply replayed again on recovery.
        let offset = self.wal.sync_durable_offset()?;
        let sessions = self.store.export_all();
        let info = self.snapshots.create(&sessions, offset)?;

        compact_segments(&self.wal_dir, info.wal_last_offset, self.retain_count)?;
        self.snapshots.prune(self.retention_count, self.retention_days)?;

        self.last_offset.store(offset.raw(), Ordering::Release);
        self.has_snapshot.store(true, Ordering::Release);
        *last_run = Instant::now();
        Ok(true)
    }

    fn last_snapshot_offset(&self) -> Option<CompositeOffset> {
        if self.has_snapshot.load(Ordering::Acquire) {
            Some(CompositeOffset::from_raw(self.last_offset.load(Ordering::Acquire)))
        } else {
            None
        }
    }
}

/// Durable session storage engine.
///
/// Every mutating call validates, appends to the WAL, and only then touches
/// the in-memory store; reads never touch the WAL. `open` performs recovery
/// before returning, so a constructed engine is always consistent with its
/// directory.
pub struct StorageEngine {
    store: Arc<SessionStore>,
    wal: WalHandle,
    wal_worker: Mutex<Option<WalWorker>>,
    snapshots: Arc<SnapshotManager>,
    cipher: Option<Arc<AeadCipher>>,
    snapshot_ctx: Arc<SnapshotContext>,
    shutdown: Arc<Shutdown>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    replayed_records: u64,
    max_sessions_per_user: usize,
    shard_count: u32,
}

impl StorageEngine {
    /// Validate the configuration, recover on-disk state, and start the
    /// background workers.
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with_cancel(config, &CancelToken::new())
    }

    /// [`open`](Self::open) with a cancellation token threaded through
    /// recovery.
    pub fn open_with_cancel(config: Config, cancel: &CancelToken) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.storage.data_dir)?;

        let node_id = load_or_create_node_id(&config.storage.data_dir)?;
        let (cipher, kdf_salt) = build_cipher(&config)?;

        let wal_dir = config.storage.data_dir.join("wal");
        let snapshot_dir = config.storage.data_dir.join("snapshots");
        let snapshots = Arc::new(SnapshotManager::open(
            &snapshot_dir,
            &node_id,
            cipher.clone(),
            kdf_salt,
        )?);

        let store = Arc::new(SessionStore::new(
            config.storage.shard_count as usize,
            config.storage.max_sessions_per_user,
        ));

        std::fs::create_dir_all(&wal_dir)?;
        let (start_offset, replayed_records) =
            recover(&store, &snapshots, &wal_dir, cipher.as_deref(), cancel)?;
        info!(
            target: "tokmesh::engine",
            node = %node_id,
            start = %start_offset,
            replayed = replayed_records,
            sessions = store.count(),
            "recovery complete"
        );

        let sync_policy = match config.wal.sync_mode {
            SyncMode::None => SyncPolicy::None,
            SyncMode::Batch => SyncPolicy::Batch { interval: config.batch_sync_interval() },
            SyncMode::Sync => SyncPolicy::Sync,
        };
        let writer = SegmentWriter::open(&wal_dir, config.wal.max_file_size, sync_policy)?;
        let worker = WalWorker::spawn(writer)?;
        let wal = worker.handle();

        let snapshot_ctx = Arc::new(SnapshotContext {
            store: Arc::clone(&store),
            wal: wal.clone(),
            wal_dir,
            snapshots: Arc::clone(&snapshots),
            interval: config.snapshot_interval(),
            wal_threshold: config.storage.snapshot_wal_threshold,
            retain_count: config.wal.retain_count,
            retention_count: config.storage.snapshot_retention_count,
            retention_days: config.storage.snapshot_retention_days,
            state: Mutex::new(Instant::now()),
            last_offset: AtomicU64::new(start_offset.raw()),
            has_snapshot: AtomicBool::new(false),
        });

        let shutdown = Shutdown::new();
        let mut workers = Vec::new();

        // Snapshot scheduler: checks both the interval and the WAL size
        // threshold at a modest cadence.
        let ctx = Arc::clone(&snapshot_ctx);
        let tick = config.snapshot_interval().min(Duration::from_secs(15));
        workers.push(spawn_ticker("snapshot", tick, Arc::clone(&shutdown), move || {
            if let Err(e) = ctx.run(false) {
                warn!(target: "tokmesh::snapshot", error = %e, "scheduled snapshot failed");
            }
        }));

        // Batch fsync timer, when the WAL is in batch mode
        if config.wal.sync_mode == SyncMode::Batch {
            let handle = wal.clone();
            workers.push(spawn_ticker(
                "wal-sync",
                config.batch_sync_interval(),
                Arc::clone(&shutdown),
                move || {
                    if let Err(e) = handle.sync_durable_offset() {
                        warn!(target: "tokmesh::wal", error = %e, "batch sync failed");
                    }
                },
            ));
        }

        // Expiry sweep
        let gc_store = Arc::clone(&store);
        let gc_wal = wal.clone();
        workers.push(spawn_ticker(
            "gc",
            Duration::from_secs(config.storage.gc_interval_secs.max(1)),
            Arc::clone(&shutdown),
            move || match gc_pass(&gc_store, &gc_wal) {
                Ok(0) => {}
                Ok(swept) => info!(target: "tokmesh::engine", swept, "expiry sweep"),
                Err(e) => warn!(target: "tokmesh::engine", error = %e, "expiry sweep failed"),
            },
        ));

        Ok(StorageEngine {
            store,
            wal,
            wal_worker: Mutex::new(Some(worker)),
            snapshots,
            cipher,
            snapshot_ctx,
            shutdown,
            workers: Mutex::new(workers),
            closed: AtomicBool::new(false),
            replayed_records,
            max_sessions_per_user: config.storage.max_sessions_per_user,
            shard_count: config.storage.shard_count,
        })
    }

    /// Configured shard count; new sessions derive their `shard_id` from
    /// this so the stored field tracks the layout actually in use.
    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::Internal("engine is closed".into()))
        } else {
            Ok(())
        }
    }

    fn encode_record(&self, mut record: WalRecord) -> Result<WalRecord> {
        if let Some(cipher) = &self.cipher {
            record.seal_session(cipher)?;
        }
        Ok(record)
    }

    /// Persist and apply a new session.
    pub fn create_session(&self, session: Session) -> Result<()> {
        self.ensure_open()?;
        session.validate()?;

        // Preflight the store checks so ordinary conflicts never reach the
        // log; the store re-checks under its lock.
        let id = session.id.as_str();
        if self.store.peek(id).is_some() {
            return Err(Error::SessionConflict(id.to_string()));
        }
        if self.store.live_count_for_user(&session.user_id) >= self.max_sessions_per_user {
            return Err(Error::SessionQuotaExceeded {
                user_id: session.user_id.clone(),
                limit: self.max_sessions_per_user,
            });
        }

        let record = self.encode_record(WalRecord::create(now_millis(), session.clone()))?;
        self.wal.append(record)?;

        self.store.create(session).map_err(|e| {
            error!(
                target: "tokmesh::engine",
                error = %e,
                "apply failed after durable create; replay will reconcile"
            );
            e
        })
    }

    /// Persist and apply a session update under an optimistic version
    /// check. On success the caller's `session.version` reflects the new
    /// version.
    pub fn update_session(&self, session: &mut Session, expected_version: u64) -> Result<()> {
        self.ensure_open()?;
        session.validate()?;

        let id = session.id.as_str().to_string();
        let current = self
            .store
            .peek(&id)
            .ok_or_else(|| Error::SessionNotFound(id.clone()))?;
        if current.version != expected_version {
            return Err(Error::SessionVersionConflict {
                expected: expected_version,
                actual: current.version,
            });
        }

        let mut logged = session.clone();
        logged.version = expected_version + 1;
        let record = self.encode_record(WalRecord::update(now_millis(), logged))?;
        self.wal.append(record)?;

        self.store.update(session, expected_version).map_err(|e| {
            error!(
                target: "tokmesh::engine",
                session = %id,
                error = %e,
                "apply failed after durable update; replay will reconcile"
            );
            e
        })
    }

    /// Persist and apply a session removal, returning the removed session.
    pub fn delete_session(&self, id: &str) -> Result<Session> {
        self.ensure_open()?;
        let current = self
            .store
            .peek(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;

        let record = WalRecord::delete(now_millis(), id, current.version + 1);
        self.wal.append(record)?;

        self.store.delete(id).map_err(|e| {
            error!(
                target: "tokmesh::engine",
                session = id,
                error = %e,
                "apply failed after durable delete; replay will reconcile"
            );
            e
        })
    }

    /// Remove every session of one user, returning how many went away.
    /// Each removal is logged before it is applied, like any other delete.
    pub fn delete_user_sessions(&self, user_id: &str) -> Result<usize> {
        self.ensure_open()?;
        let mut removed = 0;
        for id in self.store.session_ids_for_user(user_id) {
            match self.delete_session(&id) {
                Ok(_) => removed += 1,
                // Raced with an expiry sweep or a concurrent revoke
                Err(Error::SessionNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    /// Fetch a session by ID (live sessions only).
    pub fn get_session(&self, id: &str) -> Result<Session> {
        self.ensure_open()?;
        self.store.get(id)
    }

    /// Fetch a session by token hash (live sessions only).
    pub fn get_session_by_token(&self, token_hash: &str) -> Result<Session> {
        self.ensure_open()?;
        self.store.get_by_token(token_hash)
    }

    /// Record an access without writing the log; activity metadata is
    /// rebuilt from traffic, not recovered.
    pub fn touch_session(&self, id: &str, ip: &str, user_agent: &str) -> Result<()> {
        self.ensure_open()?;
        self.store.touch(id, ip, user_agent)
    }

    /// List sessions matching the filter.
    pub fn list_sessions(&self, filter: &SessionFilter) -> Result<SessionPage<Session>> {
        self.ensure_open()?;
        Ok(self.store.list(filter))
    }

    /// Sweep expired sessions now, returning how many were removed.
    pub fn gc(&self) -> Result<usize> {
        self.ensure_open()?;
        gc_pass(&self.store, &self.wal)
    }

    /// Take a snapshot immediately, regardless of the schedule.
    pub fn snapshot_now(&self) -> Result<()> {
        self.ensure_open()?;
        self.snapshot_ctx.run(true).map(|_| ())
    }

    /// Current engine counters.
    pub fn stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            store: self.store.stats(),
            wal_total_bytes: self.wal.total_size()?,
            snapshot_count: self.snapshots.list()?.len(),
            last_snapshot_offset: self.snapshot_ctx.last_snapshot_offset(),
            replayed_records: self.replayed_records,
        })
    }

    /// Direct store access for collaborators that only read.
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Shut down with the default deadline.
    pub fn close(&self) -> Result<()> {
        self.close_with_deadline(SHUTDOWN_DEADLINE)
    }

    /// Stop intake, stop workers, flush and seal the active WAL segment.
    /// Idempotent; later calls return immediately.
    pub fn close_with_deadline(&self, deadline: Duration) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let started = Instant::now();
        self.shutdown.trigger();

        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
            if started.elapsed() > deadline {
                warn!(target: "tokmesh::engine", "shutdown deadline exceeded joining workers");
                break;
            }
        }

        if let Some(worker) = self.wal_worker.lock().take() {
            worker.close()?;
        }
        info!(target: "tokmesh::engine", elapsed_ms = started.elapsed().as_millis() as u64, "engine closed");
        Ok(())
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            if let Err(e) = self.close() {
                error!(target: "tokmesh::engine", error = %e, "close during drop failed");
            }
        }
    }
}

/// Expiry sweep: remove stale sessions from memory, then log tombstones so
/// replay stays bounded. A crash between the two steps only resurrects
/// already-expired sessions, which the next sweep removes again.
fn gc_pass(store: &SessionStore, wal: &WalHandle) -> Result<usize> {
    let removed = store.cleanup_expired();
    for session in &removed {
        let record = WalRecord::delete(now_millis(), session.id.as_str(), session.version + 1);
        wal.append(record)?;
    }
    Ok(removed.len())
}

/// Rebuild the in-memory store: newest intact snapshot, then the WAL tail
/// past the snapshot's offset.
fn recover(
    store: &SessionStore,
    snapshots: &SnapshotManager,
    wal_dir: &Path,
    cipher: Option<&AeadCipher>,
    cancel: &CancelToken,
) -> Result<(CompositeOffset, u64)> {
    let start_offset = match snapshots.load(cancel) {
        Ok((sessions, info)) => {
            for session in sessions {
                store.apply_replay(session);
            }
            info!(
                target: "tokmesh::recovery",
                snapshot = %info.path.display(),
                sessions = info.session_count,
                offset = %info.wal_last_offset,
                "loaded snapshot"
            );
            info.wal_last_offset
        }
        Err(Error::NoSnapshots) => {
            info!(target: "tokmesh::recovery", "no snapshot, starting empty");
            CompositeOffset::ZERO
        }
        Err(e) => return Err(e),
    };

    let reader = SegmentReader::new(wal_dir);
    let mut applied = 0u64;
    let summary = reader.replay(start_offset, cancel, |record, _offset| {
        match record.op {
            WalOp::Create | WalOp::Update => {
                let session = record.into_session(cipher)?.ok_or_else(|| {
                    Error::Corruption("create/update record without a session body".into())
                })?;
                if store.apply_replay(session) {
                    applied += 1;
                }
            }
            WalOp::Delete => {
                if store.remove_replay(&record.sid) {
                    applied += 1;
                }
            }
        }
        Ok(())
    })?;

    if let Some(truncation) = &summary.truncation {
        reader.truncate_tail(truncation)?;
        warn!(
            target: "tokmesh::recovery",
            segment = truncation.segment_id,
            valid_len = truncation.valid_len,
            "truncated damaged WAL tail"
        );
    }

    Ok((summary.last_offset, applied))
}

fn load_or_create_node_id(data_dir: &Path) -> Result<String> {
    let path = data_dir.join("node-id");
    match std::fs::read_to_string(&path) {
        Ok(existing) => {
            let trimmed = existing.trim();
            if trimmed.is_empty() {
                Err(Error::Corruption("node-id file is empty".into()))
            } else {
                Ok(trimmed.to_string())
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let mut raw = [0u8; 6];
            OsRng
                .try_fill_bytes(&mut raw)
                .map_err(|e| Error::Crypto(format!("csprng failure: {e}")))?;
            let node_id = format!("node-{}", encode_hex(&raw));
            std::fs::write(&path, &node_id)?;
            Ok(node_id)
        }
        Err(e) => Err(e.into()),
    }
}

/// Build the configured cipher, deriving from a passphrase when needed.
///
/// The derivation salt is persisted in `<data_dir>/kdf-salt` on first boot
/// and echoed into snapshot headers, so both the WAL and any snapshot stay
/// decryptable across restarts.
fn build_cipher(config: &Config) -> Result<(Option<Arc<AeadCipher>>, Option<[u8; 16]>)> {
    let force = config.crypto.algorithm;

    if let Some(key) = config.key_bytes()? {
        let cipher = new_cipher(&key, force)?;
        return Ok((Some(Arc::new(cipher)), None));
    }

    let Some(passphrase) = &config.crypto.passphrase else {
        return Ok((None, None));
    };

    let salt_path = config.storage.data_dir.join("kdf-salt");
    let salt = match config.salt_bytes()? {
        Some(salt) => salt,
        None => match std::fs::read_to_string(&salt_path) {
            Ok(hex) => {
                let bytes = tokmesh_core::config::decode_hex(hex.trim())
                    .ok_or_else(|| Error::Corruption("kdf-salt file is not hex".into()))?;
                bytes
                    .try_into()
                    .map_err(|_| Error::Corruption("kdf-salt file has wrong length".into()))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let (_, salt) = kdf::derive_key_from_passphrase(passphrase, None)
                    .map_err(|e| Error::Crypto(e.to_string()))?;
                std::fs::write(&salt_path, encode_hex(&salt))?;
                salt
            }
            Err(e) => return Err(e.into()),
        },
    };

    let (key, salt) = kdf::derive_key_from_passphrase(passphrase, Some(salt))
        .map_err(|e| Error::Crypto(e.to_string()))?;
    let cipher = new_cipher(&key[..], force)?;
    Ok((Some(Arc::new(cipher)), Some(salt)))
}

fn new_cipher(key: &[u8], force: Option<CryptoAlgorithm>) -> Result<AeadCipher> {
    let result = match force {
        None => AeadCipher::new(key),
        Some(CryptoAlgorithm::AesGcm) => {
            AeadCipher::new_with_algorithm(key, AeadAlgorithm::AesGcm)
        }
        Some(CryptoAlgorithm::Chacha20Poly1305) => {
            AeadCipher::new_with_algorithm(key, AeadAlgorithm::Chacha20Poly1305)
        }
    };
    result.map_err(|e| Error::Crypto(e.to_string()))
}
