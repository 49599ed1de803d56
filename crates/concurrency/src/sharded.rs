//! Sharded keyed storage over `dashmap::DashMap`.
//!
//! DashMap supplies the sharding: per-instance `RandomState` seeding, a
//! power-of-two shard count, and per-shard locks with lock-free reads. This
//! module wraps it with the clone-out operation set the session store needs
//! and the version-checked swap/delete primitives that optimistic
//! concurrency builds on.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::Hash;
use tokmesh_core::Versioned;

/// Default shard count.
pub const DEFAULT_SHARD_COUNT: usize = 16;

/// Outcome of a compare-and-swap attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// Value swapped; stored version is now `expected + 1`
    Swapped,
    /// Key missing
    NotFound,
    /// Stored version differed from the expectation
    VersionMismatch {
        /// Version actually stored
        actual: u64,
    },
}

/// Concurrent map split into independently locked shards.
///
/// Values are cloned on the way out so no caller ever holds a shard lock
/// beyond the call; entry-level mutation happens through the closure and
/// compare-and-* operations, which run under the owning shard's write lock.
pub struct ShardedMap<K, V> {
    inner: DashMap<K, V>,
    shard_count: usize,
}

impl<K, V> ShardedMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a map with the default shard count.
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARD_COUNT)
    }

    /// Create a map with `shard_count` shards.
    ///
    /// # Panics
    /// Panics if `shard_count` is zero or not a power of two; shard counts
    /// come from validated configuration.
    pub fn with_shards(shard_count: usize) -> Self {
        assert!(
            shard_count.is_power_of_two() && shard_count > 0,
            "shard count must be a power of two"
        );
        // DashMap needs at least two shards
        let amount = shard_count.max(2);
        ShardedMap {
            inner: DashMap::with_shard_amount(amount),
            shard_count: amount,
        }
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Clone of the value for `key`, if present.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key).map(|entry| entry.value().clone())
    }

    /// Insert or overwrite, returning the previous value.
    pub fn set(&self, key: K, value: V) -> Option<V> {
        self.inner.insert(key, value)
    }

    /// Remove the key, returning whether it was present.
    pub fn delete(&self, key: &K) -> bool {
        self.inner.remove(key).is_some()
    }

    /// Remove and return the value.
    pub fn pop(&self, key: &K) -> Option<V> {
        self.inner.remove(key).map(|(_, value)| value)
    }

    /// Whether the key is present.
    pub fn has(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    /// Total entries across all shards.
    pub fn count(&self) -> usize {
        self.inner.len()
    }

    /// Whether the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Visit every entry. The iterator holds one shard's lock at a time, so
    /// the view is shard-consistent rather than a point-in-time snapshot of
    /// the whole map. Returning `false` stops the iteration early.
    pub fn range<F>(&self, mut visit: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        for entry in self.inner.iter() {
            if !visit(entry.key(), entry.value()) {
                return;
            }
        }
    }

    /// Clone of every entry, shard by shard.
    pub fn entries(&self) -> Vec<(K, V)> {
        let mut out = Vec::new();
        self.range(|k, v| {
            out.push((k.clone(), v.clone()));
            true
        });
        out
    }

    /// Return the existing value, or insert `value` and return it.
    /// The boolean is `true` when the key was already present.
    pub fn get_or_set(&self, key: K, value: V) -> (V, bool) {
        match self.inner.entry(key) {
            Entry::Occupied(entry) => (entry.get().clone(), true),
            Entry::Vacant(entry) => {
                entry.insert(value.clone());
                (value, false)
            }
        }
    }

    /// Insert only when the key is absent. Returns whether the insert
    /// happened.
    pub fn set_if_absent(&self, key: K, value: V) -> bool {
        match self.inner.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(value);
                true
            }
        }
    }

    /// Overwrite only when the key is present. Returns whether the write
    /// happened.
    pub fn set_if_present(&self, key: K, value: V) -> bool {
        match self.inner.get_mut(&key) {
            Some(mut existing) => {
                *existing = value;
                true
            }
            None => false,
        }
    }

    /// Insert or transform in place under the shard write lock.
    pub fn upsert<F>(&self, key: K, default: V, mut update: F)
    where
        F: FnMut(&mut V),
    {
        self.inner
            .entry(key)
            .and_modify(|existing| update(existing))
            .or_insert(default);
    }

    /// Mutate an existing value in place. Returns whether the key was
    /// present.
    pub fn update_in_place<F>(&self, key: &K, mut mutate: F) -> bool
    where
        F: FnMut(&mut V),
    {
        match self.inner.get_mut(key) {
            Some(mut value) => {
                mutate(&mut value);
                true
            }
            None => false,
        }
    }

    /// Drop every entry in every shard.
    pub fn clear(&self) {
        self.inner.clear();
    }
}

impl<K, V> ShardedMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone + Versioned,
{
    /// Atomically replace the value when the stored version matches
    /// `expected_version`. On success the new value is stored with version
    /// `expected_version + 1`; on failure the stored value is untouched.
    pub fn compare_and_swap(&self, key: &K, expected_version: u64, mut new_value: V) -> CasOutcome {
        match self.inner.get_mut(key) {
            None => CasOutcome::NotFound,
            Some(mut existing) => {
                let actual = existing.version();
                if actual != expected_version {
                    return CasOutcome::VersionMismatch { actual };
                }
                new_value.set_version(expected_version + 1);
                *existing = new_value;
                CasOutcome::Swapped
            }
        }
    }

    /// Atomically delete the value when the stored version matches.
    pub fn compare_and_delete(&self, key: &K, expected_version: u64) -> CasOutcome {
        match self.inner.entry(key.clone()) {
            Entry::Vacant(_) => CasOutcome::NotFound,
            Entry::Occupied(entry) => {
                let actual = entry.get().version();
                if actual != expected_version {
                    return CasOutcome::VersionMismatch { actual };
                }
                entry.remove();
                CasOutcome::Swapped
            }
        }
    }
}

impl<K, V> Default for ShardedMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Record {
        payload: String,
        version: u64,
    }

    impl Record {
        fn new(payload: &str) -> Self {
            Record { payload: payload.into(), version: 0 }
        }
    }

    impl Versioned for Record {
        fn version(&self) -> u64 {
            self.version
        }
        fn set_version(&mut self, version: u64) {
            self.version = version;
        }
    }

    #[test]
    fn basic_get_set_delete() {
        let map: ShardedMap<String, i32> = ShardedMap::new();
        assert!(map.get(&"a".to_string()).is_none());
        assert!(map.set("a".into(), 1).is_none());
        assert_eq!(map.set("a".into(), 2), Some(1));
        assert_eq!(map.get(&"a".to_string()), Some(2));
        assert!(map.has(&"a".to_string()));
        assert!(map.delete(&"a".to_string()));
        assert!(!map.delete(&"a".to_string()));
        assert_eq!(map.count(), 0);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn non_power_of_two_shards_panics() {
        let _map: ShardedMap<String, i32> = ShardedMap::with_shards(12);
    }

    #[test]
    fn count_spans_shards() {
        let map: ShardedMap<u64, u64> = ShardedMap::with_shards(4);
        for i in 0..100 {
            map.set(i, i);
        }
        assert_eq!(map.count(), 100);
        assert!(!map.is_empty());
        map.clear();
        assert!(map.is_empty());
    }

    #[test]
    fn range_visits_everything_and_stops_early() {
        let map: ShardedMap<u64, u64> = ShardedMap::new();
        for i in 0..50 {
            map.set(i, i * 2);
        }
        let mut seen = 0usize;
        map.range(|_, _| {
            seen += 1;
            true
        });
        assert_eq!(seen, 50);

        let mut limited = 0usize;
        map.range(|_, _| {
            limited += 1;
            limited < 10
        });
        assert_eq!(limited, 10);
    }

    #[test]
    fn get_or_set_does_not_overwrite() {
        let map: ShardedMap<String, i32> = ShardedMap::new();
        let (value, existed) = map.get_or_set("k".into(), 1);
        assert_eq!((value, existed), (1, false));
        let (value, existed) = map.get_or_set("k".into(), 99);
        assert_eq!((value, existed), (1, true));
    }

    #[test]
    fn conditional_writes() {
        let map: ShardedMap<String, i32> = ShardedMap::new();
        assert!(map.set_if_absent("k".into(), 1));
        assert!(!map.set_if_absent("k".into(), 2));
        assert_eq!(map.get(&"k".to_string()), Some(1));

        assert!(map.set_if_present("k".into(), 3));
        assert!(!map.set_if_present("missing".into(), 4));
        assert_eq!(map.get(&"k".to_string()), Some(3));
    }

    #[test]
    fn pop_removes_and_returns() {
        let map: ShardedMap<String, i32> = ShardedMap::new();
        map.set("k".into(), 7);
        assert_eq!(map.pop(&"k".to_string()), Some(7));
        assert_eq!(map.pop(&"k".to_string()), None);
    }

    #[test]
    fn upsert_inserts_then_updates() {
        let map: ShardedMap<String, i32> = ShardedMap::new();
        map.upsert("k".into(), 1, |v| *v += 10);
        assert_eq!(map.get(&"k".to_string()), Some(1));
        map.upsert("k".into(), 1, |v| *v += 10);
        assert_eq!(map.get(&"k".to_string()), Some(11));
    }

    #[test]
    fn cas_succeeds_once_per_version() {
        let map: ShardedMap<String, Record> = ShardedMap::new();
        map.set("k".into(), Record::new("v0"));

        let outcome = map.compare_and_swap(&"k".to_string(), 0, Record::new("v1"));
        assert_eq!(outcome, CasOutcome::Swapped);
        let stored = map.get(&"k".to_string()).unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.payload, "v1");

        // Same expectation again fails and leaves the value untouched
        let outcome = map.compare_and_swap(&"k".to_string(), 0, Record::new("v2"));
        assert_eq!(outcome, CasOutcome::VersionMismatch { actual: 1 });
        assert_eq!(map.get(&"k".to_string()).unwrap(), stored);

        assert_eq!(
            map.compare_and_swap(&"missing".to_string(), 0, Record::new("x")),
            CasOutcome::NotFound
        );
    }

    #[test]
    fn cad_checks_version() {
        let map: ShardedMap<String, Record> = ShardedMap::new();
        map.set("k".into(), Record::new("v0"));
        assert_eq!(
            map.compare_and_delete(&"k".to_string(), 5),
            CasOutcome::VersionMismatch { actual: 0 }
        );
        assert!(map.has(&"k".to_string()));
        assert_eq!(map.compare_and_delete(&"k".to_string(), 0), CasOutcome::Swapped);
        assert!(!map.has(&"k".to_string()));
    }

    #[test]
    fn concurrent_cas_serializes_versions() {
        let map: Arc<ShardedMap<String, Record>> = Arc::new(ShardedMap::new());
        map.set("k".into(), Record::new("v0"));

        let threads = 8;
        let per_thread = 25;
        let mut handles = Vec::new();
        for _ in 0..threads {
            let map = Arc::clone(&map);
            handles.push(std::thread::spawn(move || {
                let mut wins = 0usize;
                while wins < per_thread {
                    let current = map.get(&"k".to_string()).unwrap();
                    let outcome = map.compare_and_swap(
                        &"k".to_string(),
                        current.version,
                        Record::new("w"),
                    );
                    if outcome == CasOutcome::Swapped {
                        wins += 1;
                    } else {
                        std::thread::yield_now();
                    }
                }
                wins
            }));
        }

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, threads * per_thread);
        assert_eq!(
            map.get(&"k".to_string()).unwrap().version,
            (threads * per_thread) as u64
        );
    }
}
