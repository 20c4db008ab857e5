//! Time-to-live cache with single-flight loading.
//!
//! Entries expire `ttl` after insertion and are dropped lazily on lookup or
//! by [`TtlCache::purge_expired`]. Concurrent [`TtlCache::get_or_try_load`]
//! calls for the same missing key run the loader once: the first caller
//! loads while the rest wait on a per-key lock, then read what it stored.
//! Failed loads are not cached, so the next waiter loads for itself.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::util::SharedClock;

/// Where a [`TtlCache::get_or_try_load`] answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// A live entry was already present.
    Hit,
    /// This caller ran the loader.
    Miss,
    /// Another caller loaded the value while this one waited.
    Shared,
}

impl Lookup {
    /// Stable label used in metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Shared => "shared",
        }
    }
}

struct Entry<V> {
    expires_at: Instant,
    value: V,
}

/// Bounded TTL cache keyed by string.
pub struct TtlCache<V> {
    ttl: Duration,
    max_entries: usize,
    clock: SharedClock,
    entries: Mutex<HashMap<String, Entry<V>>>,
    loads: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<V> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("ttl", &self.ttl)
            .field("max_entries", &self.max_entries)
            .field("len", &self.entries.lock().len())
            .finish_non_exhaustive()
    }
}

impl<V: Clone> TtlCache<V> {
    /// Cache holding at most `max_entries` values for `ttl` each.
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize, clock: SharedClock) -> Self {
        Self {
            ttl,
            max_entries,
            clock,
            entries: Mutex::new(HashMap::new()),
            loads: Mutex::new(HashMap::new()),
        }
    }

    /// Live value for `key`. An expired entry is removed.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store `value` under `key` for one TTL.
    ///
    /// When full, expired entries go first, then the one closest to expiry.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            entries.retain(|_, e| e.expires_at > now);
            if entries.len() >= self.max_entries {
                let soonest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(victim) = soonest {
                    entries.remove(&victim);
                }
            }
        }
        entries.insert(
            key,
            Entry {
                expires_at: now + self.ttl,
                value,
            },
        );
    }

    /// Drop `key` if present.
    pub fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Drop expired entries; returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    /// Entries held, expired ones included until purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live value for `key`, or the result of `load` (stored on success).
    ///
    /// # Errors
    ///
    /// Whatever `load` returns; errors are passed through uncached.
    pub async fn get_or_try_load<F, Fut, E>(&self, key: &str, load: F) -> (Result<V, E>, Lookup)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return (Ok(value), Lookup::Hit);
        }

        let gate = self
            .loads
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone();
        let _loading = gate.lock().await;
        if let Some(value) = self.get(key) {
            return (Ok(value), Lookup::Shared);
        }

        let result = load().await;
        if let Ok(value) = &result {
            self.insert(key, value.clone());
        }
        {
            let mut loads = self.loads.lock();
            if loads.get(key).is_some_and(|current| Arc::ptr_eq(current, &gate)) {
                loads.remove(key);
            }
        }
        (result, Lookup::Miss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cache(ttl_secs: u64, max: usize) -> (TtlCache<u32>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (
            TtlCache::new(Duration::from_secs(ttl_secs), max, clock.clone()),
            clock,
        )
    }

    #[test]
    fn entries_expire_after_ttl() {
        let (cache, clock) = cache(10, 8);
        cache.insert("a", 1);
        clock.advance(Duration::from_secs(9));
        assert_eq!(cache.get("a"), Some(1));
        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get("a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn full_cache_evicts_expired_then_soonest() {
        let (cache, clock) = cache(10, 2);
        cache.insert("old", 1);
        clock.advance(Duration::from_secs(5));
        cache.insert("mid", 2);
        cache.insert("new", 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("old"), None);
        assert_eq!(cache.get("mid"), Some(2));

        clock.advance(Duration::from_secs(6));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.get("new"), Some(3));
    }

    #[tokio::test]
    async fn concurrent_loads_run_once() {
        let (cache, _) = cache(60, 8);
        let cache = Arc::new(cache);
        let loads = Arc::new(AtomicU32::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let loads = loads.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_try_load("k", || async {
                            loads.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok::<_, String>(7)
                        })
                        .await
                })
            })
            .collect();

        let mut misses = 0;
        for task in tasks {
            let (value, lookup) = task.await.unwrap();
            assert_eq!(value, Ok(7));
            if lookup == Lookup::Miss {
                misses += 1;
            }
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(misses, 1);
        let (_, again) = cache
            .get_or_try_load("k", || async { Err("unused".to_string()) })
            .await;
        assert_eq!(again, Lookup::Hit);
    }

    #[tokio::test]
    async fn failed_loads_are_not_cached() {
        let (cache, _) = cache(60, 8);
        let (first, lookup) = cache
            .get_or_try_load("k", || async { Err::<u32, _>("down") })
            .await;
        assert_eq!(first, Err("down"));
        assert_eq!(lookup, Lookup::Miss);
        assert!(cache.is_empty());

        let (second, _) = cache.get_or_try_load("k", || async { Ok::<_, &str>(3) }).await;
        assert_eq!(second, Ok(3));
        assert_eq!(cache.get("k"), Some(3));
    }
}
