//! The multi-index session store.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use tracing::{debug, warn};

use tokmesh_concurrency::ShardedMap;
use tokmesh_core::error::{Error, Result};
use tokmesh_core::filter::{SessionFilter, SessionPage};
use tokmesh_core::session::Session;
use tokmesh_core::time::now_millis;

/// Counters describing the store's current shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Entries in the primary index (live and not-yet-collected expired)
    pub sessions: usize,
    /// Entries in the token index
    pub token_mappings: usize,
    /// Distinct users with at least one indexed session
    pub users: usize,
    /// Distinct devices with at least one indexed session
    pub devices: usize,
}

/// Sharded session storage with secondary indexes.
///
/// # Locking
///
/// `lock` serializes every mutation that must update more than one index
/// (create, update, delete, delete-by-user, expiry cleanup, replay). Its
/// hold time is proportional to index arity, never to data size. Read paths
/// take only per-shard locks; a reader that observes a token mapping whose
/// primary entry is gone repairs the index opportunistically.
pub struct SessionStore {
    primary: ShardedMap<String, Session>,
    tokens: ShardedMap<String, String>,
    users: DashMap<String, HashSet<String>>,
    devices: DashMap<String, HashSet<String>>,
    lock: RwLock<()>,
    max_sessions_per_user: usize,
}

impl SessionStore {
    /// Store with `shard_count` primary shards and the given per-user
    /// quota.
    pub fn new(shard_count: usize, max_sessions_per_user: usize) -> Self {
        SessionStore {
            primary: ShardedMap::with_shards(shard_count),
            tokens: ShardedMap::with_shards(shard_count),
            users: DashMap::new(),
            devices: DashMap::new(),
            lock: RwLock::new(()),
            max_sessions_per_user,
        }
    }

    /// Insert a new session, enforcing ID uniqueness, token-hash uniqueness,
    /// and the per-user quota. All indexes are updated atomically.
    pub fn create(&self, session: Session) -> Result<()> {
        session.validate()?;
        let _guard = self.lock.write();
        let now = now_millis();

        let id = session.id.as_str().to_string();
        if self.primary.has(&id) {
            return Err(Error::SessionConflict(id));
        }

        let live = self.live_session_count_locked(&session.user_id, now);
        if live >= self.max_sessions_per_user {
            return Err(Error::SessionQuotaExceeded {
                user_id: session.user_id.clone(),
                limit: self.max_sessions_per_user,
            });
        }

        if !session.token_hash.is_empty() && self.token_mapping_alive(&session.token_hash, &id) {
            return Err(Error::TokenHashConflict);
        }

        if !session.token_hash.is_empty() {
            self.tokens.set(session.token_hash.clone(), id.clone());
        }
        self.users
            .entry(session.user_id.clone())
            .or_default()
            .insert(id.clone());
        if !session.device_id.is_empty() {
            self.devices
                .entry(session.device_id.clone())
                .or_default()
                .insert(id.clone());
        }
        self.primary.set(id, session);
        Ok(())
    }

    /// Replace a session under an optimistic version check.
    ///
    /// On success the stored copy's version is `expected_version + 1` and
    /// the caller's `session.version` is updated to match. A token-hash
    /// change atomically retires the old mapping and installs the new one,
    /// re-checking uniqueness first.
    pub fn update(&self, session: &mut Session, expected_version: u64) -> Result<()> {
        session.validate()?;
        let _guard = self.lock.write();

        let id = session.id.as_str().to_string();
        let current = self
            .primary
            .get(&id)
            .ok_or_else(|| Error::SessionNotFound(id.clone()))?;
        if current.version != expected_version {
            return Err(Error::SessionVersionConflict {
                expected: expected_version,
                actual: current.version,
            });
        }
        if current.user_id != session.user_id {
            return Err(Error::InvalidArgument(
                "a session cannot move between users".into(),
            ));
        }

        if session.token_hash != current.token_hash {
            if !session.token_hash.is_empty() && self.token_mapping_alive(&session.token_hash, &id)
            {
                return Err(Error::TokenHashConflict);
            }
            if !current.token_hash.is_empty() {
                self.tokens.delete(&current.token_hash);
            }
            if !session.token_hash.is_empty() {
                self.tokens.set(session.token_hash.clone(), id.clone());
            }
        }

        if session.device_id != current.device_id {
            self.unindex_device(&current.device_id, &id);
            if !session.device_id.is_empty() {
                self.devices
                    .entry(session.device_id.clone())
                    .or_default()
                    .insert(id.clone());
            }
        }

        session.version = expected_version + 1;
        self.primary.set(id, session.clone());
        Ok(())
    }

    /// Record an access on a session in place, without a version check.
    /// Best-effort: a concurrent delete simply reports `SessionNotFound`.
    pub fn touch(&self, id: &str, ip: &str, user_agent: &str) -> Result<()> {
        let now = now_millis();
        let found = self
            .primary
            .update_in_place(&id.to_string(), |session| session.touch(now, ip, user_agent));
        if found {
            Ok(())
        } else {
            Err(Error::SessionNotFound(id.to_string()))
        }
    }

    /// Fetch a session by ID. Expired-but-uncollected entries report
    /// `SessionExpired` so callers can distinguish stale from missing.
    pub fn get(&self, id: &str) -> Result<Session> {
        let session = self
            .primary
            .get(&id.to_string())
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        if !session.is_live(now_millis()) {
            return Err(Error::SessionExpired(id.to_string()));
        }
        Ok(session)
    }

    /// Fetch a session regardless of liveness. Revocation and renewal need
    /// to see expired-but-uncollected entries.
    pub fn peek(&self, id: &str) -> Option<Session> {
        self.primary.get(&id.to_string())
    }

    /// Fetch a session by token hash, healing dangling index entries on the
    /// way.
    pub fn get_by_token(&self, token_hash: &str) -> Result<Session> {
        let key = token_hash.to_string();
        let id = self
            .tokens
            .get(&key)
            .ok_or_else(|| Error::SessionNotFound(format!("token:{token_hash}")))?;

        match self.primary.get(&id) {
            None => {
                // Dangling mapping left by a crashed multi-step delete
                self.tokens.delete(&key);
                debug!(target: "tokmesh::store", token = %key, "healed dangling token mapping");
                Err(Error::SessionNotFound(format!("token:{token_hash}")))
            }
            Some(session) if session.token_hash != *token_hash => {
                // Mapping outlived a token rotation
                self.tokens.delete(&key);
                Err(Error::SessionNotFound(format!("token:{token_hash}")))
            }
            Some(session) if !session.is_live(now_millis()) => {
                Err(Error::SessionExpired(id))
            }
            Some(session) => Ok(session),
        }
    }

    /// Remove a session and every index entry pointing at it.
    pub fn delete(&self, id: &str) -> Result<Session> {
        let _guard = self.lock.write();
        self.delete_locked(id)
    }

    fn delete_locked(&self, id: &str) -> Result<Session> {
        let mut session = self
            .primary
            .pop(&id.to_string())
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        session.is_deleted = true;

        if !session.token_hash.is_empty() {
            // Only drop the mapping if it still points at us
            if self.tokens.get(&session.token_hash).as_deref() == Some(id) {
                self.tokens.delete(&session.token_hash);
            }
        }
        self.unindex_user(&session.user_id, id);
        self.unindex_device(&session.device_id, id);
        Ok(session)
    }

    /// IDs currently indexed for `user_id`, live or not.
    pub fn session_ids_for_user(&self, user_id: &str) -> Vec<String> {
        self.users
            .get(user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove every session belonging to `user_id`, returning the removed
    /// sessions.
    pub fn delete_by_user(&self, user_id: &str) -> Vec<Session> {
        let _guard = self.lock.write();

        let ids: Vec<String> = self
            .users
            .get(user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            match self.delete_locked(&id) {
                Ok(session) => removed.push(session),
                // Index entry without a primary row: the unindex path below
                // already pruned it via delete_locked's cleanup
                Err(Error::SessionNotFound(_)) => {
                    self.unindex_user(user_id, &id);
                }
                Err(e) => warn!(target: "tokmesh::store", error = %e, "delete_by_user skip"),
            }
        }
        self.users.remove_if(user_id, |_, set| set.is_empty());
        removed
    }

    /// Remove every session whose expiry is in the past, returning the
    /// removed sessions.
    pub fn cleanup_expired(&self) -> Vec<Session> {
        let now = now_millis();
        let mut stale = Vec::new();
        self.primary.range(|id, session| {
            if !session.is_live(now) {
                stale.push(id.clone());
            }
            true
        });

        let _guard = self.lock.write();
        let mut removed = Vec::with_capacity(stale.len());
        for id in stale {
            // Re-check under the lock; the session may have been renewed
            // between the scan and now
            match self.primary.get(&id) {
                Some(session) if !session.is_live(now_millis()) => {
                    if let Ok(session) = self.delete_locked(session.id.as_str()) {
                        removed.push(session);
                    }
                }
                _ => {}
            }
        }
        removed
    }

    /// List sessions matching `filter`, sorted and paginated.
    pub fn list(&self, filter: &SessionFilter) -> SessionPage<Session> {
        let candidates = match &filter.user_id {
            Some(user_id) => {
                let ids: Vec<String> = self
                    .users
                    .get(user_id)
                    .map(|set| set.iter().cloned().collect())
                    .unwrap_or_default();
                ids.into_iter()
                    .filter_map(|id| self.primary.get(&id))
                    .collect()
            }
            None => {
                let mut all = Vec::new();
                self.primary.range(|_, session| {
                    all.push(session.clone());
                    true
                });
                all
            }
        };
        crate::listing::apply(candidates, filter)
    }

    /// Count of live sessions for one user.
    pub fn live_count_for_user(&self, user_id: &str) -> usize {
        self.live_session_count_locked(user_id, now_millis())
    }

    /// Entries in the primary index.
    pub fn count(&self) -> usize {
        self.primary.count()
    }

    /// Clone of every session, shard by shard. Writers may interleave; the
    /// WAL covers anything a concurrent mutation changes after the copy.
    pub fn export_all(&self) -> Vec<Session> {
        let mut all = Vec::with_capacity(self.primary.count());
        self.primary.range(|_, session| {
            all.push(session.clone());
            true
        });
        all
    }

    /// Shape counters for the stats surface.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            sessions: self.primary.count(),
            token_mappings: self.tokens.count(),
            users: self.users.len(),
            devices: self.devices.len(),
        }
    }

    /// Insert or overwrite a session during WAL replay or snapshot load.
    ///
    /// Quota checks do not apply; a record whose version is at or below the
    /// version already in memory is skipped so overlapping replay at the
    /// snapshot boundary stays idempotent. Returns whether the session was
    /// applied.
    pub fn apply_replay(&self, session: Session) -> bool {
        let _guard = self.lock.write();
        let id = session.id.as_str().to_string();

        if let Some(existing) = self.primary.get(&id) {
            if existing.version >= session.version {
                return false;
            }
            if existing.token_hash != session.token_hash && !existing.token_hash.is_empty() {
                self.tokens.delete(&existing.token_hash);
            }
            if existing.device_id != session.device_id {
                self.unindex_device(&existing.device_id, &id);
            }
        }

        if !session.token_hash.is_empty() {
            self.tokens.set(session.token_hash.clone(), id.clone());
        }
        self.users
            .entry(session.user_id.clone())
            .or_default()
            .insert(id.clone());
        if !session.device_id.is_empty() {
            self.devices
                .entry(session.device_id.clone())
                .or_default()
                .insert(id.clone());
        }
        self.primary.set(id, session);
        true
    }

    /// Remove a session during WAL replay, ignoring versions.
    pub fn remove_replay(&self, id: &str) -> bool {
        let _guard = self.lock.write();
        self.delete_locked(id).is_ok()
    }

    /// Drop every session and index entry.
    pub fn clear(&self) {
        let _guard = self.lock.write();
        self.primary.clear();
        self.tokens.clear();
        self.users.clear();
        self.devices.clear();
    }

    fn live_session_count_locked(&self, user_id: &str, now: i64) -> usize {
        match self.users.get(user_id) {
            None => 0,
            Some(set) => set
                .iter()
                .filter(|id| {
                    self.primary
                        .get(&(*id).clone())
                        .map(|s| s.is_live(now))
                        .unwrap_or(false)
                })
                .count(),
        }
    }

    /// Whether `token_hash` is claimed by a live primary entry other than
    /// `id`. Dangling mappings are healed on the way.
    fn token_mapping_alive(&self, token_hash: &str, id: &str) -> bool {
        match self.tokens.get(&token_hash.to_string()) {
            None => false,
            Some(owner) if owner == id => false,
            Some(owner) => {
                if self.primary.has(&owner) {
                    true
                } else {
                    self.tokens.delete(&token_hash.to_string());
                    false
                }
            }
        }
    }

    fn unindex_user(&self, user_id: &str, id: &str) {
        if let Some(mut set) = self.users.get_mut(user_id) {
            set.remove(id);
        }
        self.users.remove_if(user_id, |_, set| set.is_empty());
    }

    fn unindex_device(&self, device_id: &str, id: &str) {
        if device_id.is_empty() {
            return;
        }
        if let Some(mut set) = self.devices.get_mut(device_id) {
            set.remove(id);
        }
        self.devices.remove_if(device_id, |_, set| set.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tokmesh_core::filter::{SessionStatus, SortKey, SortOrder};
    use tokmesh_core::session::SessionId;

    fn store() -> SessionStore {
        SessionStore::new(16, 50)
    }

    fn session_for(user: &str) -> Session {
        session_with_ttl(user, 3600)
    }

    fn session_with_ttl(user: &str, ttl_secs: i64) -> Session {
        let now = now_millis();
        let id = SessionId::generate().unwrap();
        Session {
            shard_id: id.shard_id(16),
            id,
            user_id: user.into(),
            token_hash: tokmesh_core::config::encode_hex(&rand_hash()),
            ip_address: "127.0.0.1".into(),
            user_agent: "tests".into(),
            device_id: format!("dev-{user}"),
            created_by: "tests".into(),
            created_at: now,
            expires_at: now + ttl_secs * 1000,
            last_active: now,
            last_access_ip: String::new(),
            last_access_ua: String::new(),
            data: BTreeMap::new(),
            version: 0,
            ttl: ttl_secs,
            is_deleted: false,
        }
    }

    fn rand_hash() -> [u8; 32] {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let mut out = [0u8; 32];
        out[..8].copy_from_slice(&COUNTER.fetch_add(1, Ordering::Relaxed).to_be_bytes());
        out
    }

    #[test]
    fn create_then_get_roundtrips() {
        let store = store();
        let session = session_for("u1");
        let id = session.id.as_str().to_string();
        store.create(session.clone()).unwrap();

        let loaded = store.get(&id).unwrap();
        assert_eq!(loaded, session);
        let by_token = store.get_by_token(&session.token_hash).unwrap();
        assert_eq!(by_token.id, session.id);
    }

    #[test]
    fn duplicate_id_conflicts_without_index_damage() {
        let store = store();
        let session = session_for("u1");
        store.create(session.clone()).unwrap();

        let mut dup = session_for("u2");
        dup.id = session.id.clone();
        assert!(matches!(
            store.create(dup),
            Err(Error::SessionConflict(_))
        ));
        // u2 gained no index entry
        assert_eq!(store.live_count_for_user("u2"), 0);
        assert_eq!(store.stats().sessions, 1);
    }

    #[test]
    fn duplicate_token_hash_conflicts() {
        let store = store();
        let session = session_for("u1");
        store.create(session.clone()).unwrap();

        let mut other = session_for("u2");
        other.token_hash = session.token_hash.clone();
        assert!(matches!(store.create(other), Err(Error::TokenHashConflict)));
    }

    #[test]
    fn quota_counts_live_sessions_only() {
        let store = SessionStore::new(16, 1);
        store.create(session_for("u1")).unwrap();
        assert!(matches!(
            store.create(session_for("u1")),
            Err(Error::SessionQuotaExceeded { .. })
        ));

        // An expired session does not count against the quota
        let store = SessionStore::new(16, 1);
        let mut expired = session_for("u2");
        expired.created_at = now_millis() - 10_000;
        expired.expires_at = now_millis() - 1000;
        store.create(expired).unwrap();
        store.create(session_for("u2")).unwrap();
    }

    #[test]
    fn update_bumps_version_and_reports_conflicts() {
        let store = store();
        let mut session = session_for("u1");
        let id = session.id.as_str().to_string();
        store.create(session.clone()).unwrap();

        session.data.insert("k".into(), "v".into());
        store.update(&mut session, 0).unwrap();
        assert_eq!(session.version, 1, "caller's version is written back");
        assert_eq!(store.get(&id).unwrap().version, 1);

        // Stale expectation
        let mut stale = session.clone();
        let err = store.update(&mut stale, 0).unwrap_err();
        assert!(matches!(
            err,
            Error::SessionVersionConflict { expected: 0, actual: 1 }
        ));
        assert_eq!(store.get(&id).unwrap().version, 1);
    }

    #[test]
    fn update_missing_session_is_not_found() {
        let store = store();
        let mut session = session_for("u1");
        assert!(matches!(
            store.update(&mut session, 0),
            Err(Error::SessionNotFound(_))
        ));
    }

    #[test]
    fn token_rotation_is_atomic() {
        let store = store();
        let mut session = session_for("u1");
        let old_hash = session.token_hash.clone();
        store.create(session.clone()).unwrap();

        let new_hash = tokmesh_core::config::encode_hex(&rand_hash());
        session.token_hash = new_hash.clone();
        store.update(&mut session, 0).unwrap();

        assert!(matches!(
            store.get_by_token(&old_hash),
            Err(Error::SessionNotFound(_))
        ));
        assert_eq!(store.get_by_token(&new_hash).unwrap().id, session.id);
    }

    #[test]
    fn rotation_onto_claimed_hash_conflicts() {
        let store = store();
        let session_a = session_for("u1");
        let mut session_b = session_for("u2");
        store.create(session_a.clone()).unwrap();
        store.create(session_b.clone()).unwrap();

        session_b.token_hash = session_a.token_hash.clone();
        assert!(matches!(
            store.update(&mut session_b, 0),
            Err(Error::TokenHashConflict)
        ));
        // b's original mapping is intact
        assert_eq!(
            store.get_by_token(&store.get(session_b.id.as_str()).unwrap().token_hash).unwrap().id,
            session_b.id
        );
    }

    #[test]
    fn touch_updates_activity_without_version_bump() {
        let store = store();
        let session = session_for("u1");
        let id = session.id.as_str().to_string();
        store.create(session).unwrap();

        store.touch(&id, "10.1.1.1", "agent/2").unwrap();
        let loaded = store.get(&id).unwrap();
        assert_eq!(loaded.last_access_ip, "10.1.1.1");
        assert_eq!(loaded.last_access_ua, "agent/2");
        assert_eq!(loaded.version, 0);

        assert!(matches!(
            store.touch("tmss-missing", "", ""),
            Err(Error::SessionNotFound(_))
        ));
    }

    #[test]
    fn expired_get_is_distinguishable_from_missing() {
        let store = store();
        let mut session = session_for("u1");
        session.created_at = now_millis() - 10_000;
        session.expires_at = now_millis() - 5;
        let id = session.id.as_str().to_string();
        let hash = session.token_hash.clone();
        store.create(session).unwrap();

        assert!(matches!(store.get(&id), Err(Error::SessionExpired(_))));
        assert!(matches!(
            store.get_by_token(&hash),
            Err(Error::SessionExpired(_))
        ));
        assert!(matches!(
            store.get("tmss-missing"),
            Err(Error::SessionNotFound(_))
        ));
    }

    #[test]
    fn delete_clears_every_index() {
        let store = store();
        let session = session_for("u1");
        let id = session.id.as_str().to_string();
        let hash = session.token_hash.clone();
        store.create(session).unwrap();

        let removed = store.delete(&id).unwrap();
        assert_eq!(removed.id.as_str(), id);

        assert!(matches!(store.get(&id), Err(Error::SessionNotFound(_))));
        assert!(matches!(
            store.get_by_token(&hash),
            Err(Error::SessionNotFound(_))
        ));
        let stats = store.stats();
        assert_eq!(stats.sessions, 0);
        assert_eq!(stats.token_mappings, 0);
        assert_eq!(stats.users, 0);
        assert_eq!(stats.devices, 0);
    }

    #[test]
    fn delete_by_user_removes_only_that_user() {
        let store = store();
        for _ in 0..3 {
            store.create(session_for("u1")).unwrap();
        }
        store.create(session_for("u2")).unwrap();

        let removed = store.delete_by_user("u1");
        assert_eq!(removed.len(), 3);
        assert_eq!(store.stats().sessions, 1);
        assert_eq!(store.live_count_for_user("u1"), 0);
        assert_eq!(store.live_count_for_user("u2"), 1);
        assert!(store.delete_by_user("unknown").is_empty());
    }

    #[test]
    fn cleanup_expired_sweeps_only_stale() {
        let store = store();
        store.create(session_for("u1")).unwrap();
        let mut stale = session_for("u2");
        stale.created_at = now_millis() - 10_000;
        stale.expires_at = now_millis() - 1;
        store.create(stale).unwrap();

        let removed = store.cleanup_expired();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].user_id, "u2");
        assert_eq!(store.stats().sessions, 1);
        // Token index entries of swept sessions go too
        assert_eq!(store.stats().token_mappings, 1);
    }

    #[test]
    fn replay_apply_is_version_idempotent() {
        let store = store();
        let mut session = session_for("u1");
        session.version = 3;
        assert!(store.apply_replay(session.clone()));

        // Same version again: skipped
        assert!(!store.apply_replay(session.clone()));
        // Older: skipped
        let mut older = session.clone();
        older.version = 2;
        assert!(!store.apply_replay(older));
        // Newer with a rotated token: applied, old mapping retired
        let mut newer = session.clone();
        newer.version = 4;
        let old_hash = session.token_hash.clone();
        newer.token_hash = tokmesh_core::config::encode_hex(&rand_hash());
        assert!(store.apply_replay(newer.clone()));
        assert!(matches!(
            store.get_by_token(&old_hash),
            Err(Error::SessionNotFound(_))
        ));
        assert_eq!(store.get_by_token(&newer.token_hash).unwrap().version, 4);
    }

    #[test]
    fn replay_bypasses_quota() {
        let store = SessionStore::new(16, 1);
        assert!(store.apply_replay(session_for("u1")));
        assert!(store.apply_replay(session_for("u1")));
        assert_eq!(store.stats().sessions, 2);
    }

    #[test]
    fn replay_remove_ignores_version() {
        let store = store();
        let mut session = session_for("u1");
        session.version = 7;
        store.apply_replay(session.clone());
        assert!(store.remove_replay(session.id.as_str()));
        assert!(!store.remove_replay(session.id.as_str()));
        assert_eq!(store.stats().sessions, 0);
    }

    #[test]
    fn user_index_matches_live_set_after_churn() {
        let store = store();
        let mut ids = Vec::new();
        for _ in 0..10 {
            let session = session_for("u1");
            ids.push(session.id.as_str().to_string());
            store.create(session).unwrap();
        }
        for id in &ids[..5] {
            store.delete(id).unwrap();
        }
        assert_eq!(store.live_count_for_user("u1"), 5);
        let page = store.list(&SessionFilter::for_user("u1"));
        assert_eq!(page.total, 5);
        for item in &page.items {
            assert_eq!(item.user_id, "u1");
            assert!(!ids[..5].contains(&item.id.as_str().to_string()));
        }
    }

    #[test]
    fn list_filters_sorts_and_paginates() {
        let store = store();
        for i in 0..5 {
            let mut session = session_for("u1");
            session.created_at = 1_000 + i;
            session.last_active = 10_000 - i;
            store.create(session).unwrap();
        }

        let mut filter = SessionFilter::for_user("u1");
        filter.sort_by = SortKey::CreatedAt;
        filter.order = SortOrder::Asc;
        filter.page.size = 2;
        let page = store.list(&filter);
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert!(page.items[0].created_at < page.items[1].created_at);

        filter.page.number = 3;
        let last_page = store.list(&filter);
        assert_eq!(last_page.items.len(), 1);

        filter.page.number = 9;
        assert!(store.list(&filter).items.is_empty());
    }

    #[test]
    fn list_default_excludes_expired() {
        let store = store();
        store.create(session_for("u1")).unwrap();
        let mut stale = session_for("u1");
        stale.created_at = now_millis() - 10_000;
        stale.expires_at = now_millis() - 1;
        store.create(stale).unwrap();

        let page = store.list(&SessionFilter::for_user("u1"));
        assert_eq!(page.total, 1);

        let mut filter = SessionFilter::for_user("u1");
        filter.status = Some(SessionStatus::Expired);
        assert_eq!(store.list(&filter).total, 1);
    }

    #[test]
    fn list_full_scan_honors_filters() {
        let store = store();
        let mut a = session_for("u1");
        a.ip_address = "10.0.0.1".into();
        let mut b = session_for("u2");
        b.ip_address = "10.0.0.2".into();
        store.create(a).unwrap();
        store.create(b).unwrap();

        let filter = SessionFilter {
            ip_address: Some("10.0.0.2".into()),
            ..Default::default()
        };
        let page = store.list(&filter);
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].user_id, "u2");

        let filter = SessionFilter {
            device_id: Some("dev-u1".into()),
            ..Default::default()
        };
        assert_eq!(store.list(&filter).total, 1);
    }
}
