//! Crash and corruption recovery against real files.

use std::io::Write;
use std::sync::Arc;
use tempfile::TempDir;
use tokmesh::{
    Config, CreateSessionRequest, SessionFilter, SessionService, StorageEngine, SyncMode,
};

fn config_for(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.path().to_path_buf();
    config.storage.gc_interval_secs = 3600;
    config.storage.snapshot_interval_secs = 3600;
    config.wal.sync_mode = SyncMode::Sync;
    config
}

fn request(user: &str) -> CreateSessionRequest {
    CreateSessionRequest {
        user_id: user.into(),
        ttl_seconds: Some(3600),
        ..Default::default()
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn mixed_operations_replay_to_the_same_state() {
    init_logging();
    let dir = TempDir::new().unwrap();

    let (kept_ids, revoked_id) = {
        let service = SessionService::new(Arc::new(StorageEngine::open(config_for(&dir)).unwrap()));

        let a = service.create_session(request("u1")).unwrap();
        let b = service.create_session(request("u2")).unwrap();
        service.renew_session(&a.session_id, Some(7200)).unwrap();
        service.revoke_session(&b.session_id).unwrap();
        service.create_session(request("u3")).unwrap();
        let d = service.create_session(request("u1")).unwrap();
        service.revoke_user_sessions("u3").unwrap();

        service.engine().close().unwrap();
        (vec![a.session_id, d.session_id], b.session_id)
    };

    let engine = StorageEngine::open(config_for(&dir)).unwrap();
    let service = SessionService::new(Arc::new(engine));

    for id in &kept_ids {
        service.get_session(id).unwrap();
    }
    assert!(service.get_session(&revoked_id).is_err());
    assert_eq!(
        service.list_sessions(&SessionFilter::default()).unwrap().total,
        2
    );
    // The renewed session carries its bumped version and TTL
    let renewed = service.get_session(&kept_ids[0]).unwrap();
    assert_eq!(renewed.version, 1);
    assert_eq!(renewed.ttl, 7200);

    service.engine().close().unwrap();
}

#[test]
fn torn_tail_write_is_truncated_on_startup() {
    init_logging();
    let dir = TempDir::new().unwrap();

    let survivor = {
        let service = SessionService::new(Arc::new(StorageEngine::open(config_for(&dir)).unwrap()));
        let created = service.create_session(request("u1")).unwrap();
        service.engine().close().unwrap();
        created.session_id
    };

    // Closing sealed the segment; recovery treats a sealed file as history.
    // Simulate a torn append by tacking garbage onto a fresh, unsealed
    // segment: reopen creates segment 2, then we stamp garbage into it.
    {
        let engine = StorageEngine::open(config_for(&dir)).unwrap();
        let service = SessionService::new(Arc::new(engine));
        service.create_session(request("u2")).unwrap();
        // Crash without close: threads stop, file stays unsealed
        let wal_dir = dir.path().join("wal");
        let newest = std::fs::read_dir(&wal_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|x| x == "wal").unwrap_or(false))
            .max()
            .unwrap();
        service.engine().close().unwrap();
        let mut file = std::fs::OpenOptions::new().append(true).open(newest).unwrap();
        file.write_all(&[0x5A; 23]).unwrap();
    }

    let engine = StorageEngine::open(config_for(&dir)).unwrap();
    let service = SessionService::new(Arc::new(engine));
    assert!(service.get_session(&survivor).is_ok());
    assert_eq!(
        service.list_sessions(&SessionFilter::default()).unwrap().total,
        2
    );
    service.engine().close().unwrap();
}

#[test]
fn corrupt_newest_snapshot_falls_back_to_older() {
    init_logging();
    let dir = TempDir::new().unwrap();

    let ids = {
        let engine = Arc::new(StorageEngine::open(config_for(&dir)).unwrap());
        let service = SessionService::new(Arc::clone(&engine));

        let a = service.create_session(request("u1")).unwrap();
        engine.snapshot_now().unwrap();
        let b = service.create_session(request("u2")).unwrap();
        engine.snapshot_now().unwrap();
        let c = service.create_session(request("u3")).unwrap();
        engine.close().unwrap();
        vec![a.session_id, b.session_id, c.session_id]
    };

    // Flip the last byte of the newest snapshot file
    let snapshot_dir = dir.path().join("snapshots");
    let newest = std::fs::read_dir(&snapshot_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|x| x == "snap").unwrap_or(false))
        .max()
        .unwrap();
    let mut bytes = std::fs::read(&newest).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&newest, &bytes).unwrap();

    // Recovery must land on the older snapshot and rebuild the rest from
    // the WAL: the final state is identical to a replay from empty
    let engine = StorageEngine::open(config_for(&dir)).unwrap();
    let service = SessionService::new(Arc::new(engine));
    for id in &ids {
        service.get_session(id).unwrap();
    }
    assert_eq!(
        service.list_sessions(&SessionFilter::default()).unwrap().total,
        3
    );
    service.engine().close().unwrap();
}

#[test]
fn snapshot_only_recovery_when_wal_is_compacted() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let mut config = config_for(&dir);
    config.wal.max_file_size = 4096;
    config.wal.retain_count = 1;

    let count = 25;
    {
        let engine = Arc::new(StorageEngine::open(config.clone()).unwrap());
        let service = SessionService::new(Arc::clone(&engine));
        for i in 0..count {
            service.create_session(request(&format!("user-{i}"))).unwrap();
        }
        engine.snapshot_now().unwrap();
        engine.close().unwrap();
    }

    let engine = StorageEngine::open(config).unwrap();
    let stats = engine.stats().unwrap();
    assert_eq!(stats.store.sessions, count);
    engine.close().unwrap();
}

#[test]
fn snapshot_boundary_replay_matches_replay_from_empty() {
    init_logging();
    let dir = TempDir::new().unwrap();

    {
        let engine = Arc::new(StorageEngine::open(config_for(&dir)).unwrap());
        let service = SessionService::new(Arc::clone(&engine));
        let a = service.create_session(request("u1")).unwrap();
        let b = service.create_session(request("u2")).unwrap();
        engine.snapshot_now().unwrap();
        service.renew_session(&a.session_id, Some(7200)).unwrap();
        service.revoke_session(&b.session_id).unwrap();
        service.create_session(request("u3")).unwrap();
        engine.close().unwrap();
    }

    // Same WAL, no snapshots: recovery must replay the full history to the
    // identical state
    let twin = TempDir::new().unwrap();
    std::fs::create_dir_all(twin.path().join("wal")).unwrap();
    for entry in std::fs::read_dir(dir.path().join("wal")).unwrap() {
        let entry = entry.unwrap();
        std::fs::copy(
            entry.path(),
            twin.path().join("wal").join(entry.file_name()),
        )
        .unwrap();
    }

    let from_snapshot = StorageEngine::open(config_for(&dir)).unwrap();
    let from_empty = StorageEngine::open(config_for(&twin)).unwrap();

    let mut all = SessionFilter::default();
    all.page.size = 100;
    let a_page = from_snapshot.list_sessions(&all).unwrap();
    let b_page = from_empty.list_sessions(&all).unwrap();
    assert_eq!(a_page.total, b_page.total);
    assert_eq!(a_page.items, b_page.items, "states diverged at the boundary");

    from_snapshot.close().unwrap();
    from_empty.close().unwrap();
}

#[test]
fn encrypted_at_rest_recovers_from_passphrase() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let mut config = config_for(&dir);
    config.crypto.passphrase = Some("thirty three turtles".into());

    let id = {
        let service =
            SessionService::new(Arc::new(StorageEngine::open(config.clone()).unwrap()));
        let created = service.create_session(request("u1")).unwrap();
        service.engine().snapshot_now().unwrap();
        service.engine().close().unwrap();
        created.session_id
    };

    // Nothing in the data dir stores the session in the clear
    let service = SessionService::new(Arc::new(StorageEngine::open(config).unwrap()));
    assert_eq!(service.get_session(&id).unwrap().user_id, "u1");
    service.engine().close().unwrap();
}
