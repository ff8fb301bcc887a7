//! A cache that recomputes a key's value only when its modification time
//! moves forward.
//!
//! Every key has its own entry with two locks: a compute lock that
//! serializes `load_or_store` callers, and a short-lived state lock
//! guarding the `(mtime, value)` pair. Plain `load`s only take the state
//! lock, so they never wait for a running computation.

use dashmap::DashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

struct Entry<V> {
    compute: Mutex<()>,
    state: RwLock<Option<(SystemTime, V)>>,
}

impl<V> Default for Entry<V> {
    fn default() -> Self {
        Self {
            compute: Mutex::new(()),
            state: RwLock::new(None),
        }
    }
}

impl<V: Clone> Entry<V> {
    fn get(&self) -> Option<(SystemTime, V)> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.clone()
    }

    fn set(&self, mtime: SystemTime, value: V) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        *state = Some((mtime, value));
    }
}

pub struct Cache<K, V> {
    entries: DashMap<K, Arc<Entry<V>>>,
}

impl<K: Eq + Hash, V> fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl<K, V> Default for Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    // The map shard lock is released before any entry lock is taken.
    fn entry(&self, key: &K) -> Arc<Entry<V>> {
        if let Some(entry) = self.entries.get(key) {
            return entry.value().clone();
        }
        self.entries.entry(key.clone()).or_default().value().clone()
    }

    /// Overwrites the entry regardless of its current mtime.
    pub fn store(&self, key: K, mtime: SystemTime, value: V) {
        self.entry(&key).set(mtime, value);
    }

    pub fn load(&self, key: &K) -> Option<V> {
        let entry = self.entries.get(key)?.value().clone();
        entry.get().map(|(_, v)| v)
    }

    /// Returns the cached value unless `mtime` is strictly newer than the
    /// cached mtime, in which case `compute` runs and its result replaces
    /// the entry. A failing `compute` leaves the entry untouched.
    pub fn load_or_store<E, F>(&self, key: K, mtime: SystemTime, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let entry = self.entry(&key);
        let _computing = entry.compute.lock().unwrap_or_else(|e| e.into_inner());

        if let Some((cached_mtime, value)) = entry.get() {
            if mtime <= cached_mtime {
                return Ok(value);
            }
        }

        let value = compute()?;
        entry.set(mtime, value.clone());
        Ok(value)
    }

    pub fn remove(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Barrier, mpsc};
    use std::time::Duration;

    fn t(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn concurrent_loads_compute_once() {
        let cache = Arc::new(Cache::<String, u64>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    cache
                        .load_or_store("k".to_string(), t(10), || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(20));
                            Ok::<_, ()>(99)
                        })
                        .unwrap()
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), 99);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_keys_compute_in_parallel() {
        let cache = Arc::new(Cache::<&'static str, u32>::new());
        let started = Arc::new(Barrier::new(2));
        let (tx, rx) = mpsc::channel();

        let slow = {
            let cache = cache.clone();
            let started = started.clone();
            std::thread::spawn(move || {
                cache.load_or_store("a", t(1), || {
                    started.wait();
                    // only completes once "b" has been computed
                    rx.recv_timeout(Duration::from_secs(5)).map(|()| 1)
                })
            })
        };

        started.wait();
        let b = cache
            .load_or_store("b", t(1), || {
                tx.send(()).unwrap();
                Ok::<_, mpsc::RecvTimeoutError>(2)
            })
            .unwrap();
        assert_eq!(b, 2);
        assert_eq!(slow.join().unwrap(), Ok(1));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn older_mtime_returns_cached_value() {
        let cache = Cache::new();
        let v = cache.load_or_store("k", t(10), || Ok::<_, ()>("first")).unwrap();
        assert_eq!(v, "first");

        let v = cache
            .load_or_store("k", t(5), || -> Result<&str, ()> {
                panic!("must not recompute for an older mtime")
            })
            .unwrap();
        assert_eq!(v, "first");

        let v = cache
            .load_or_store("k", t(10), || -> Result<&str, ()> {
                panic!("must not recompute for an equal mtime")
            })
            .unwrap();
        assert_eq!(v, "first");

        let v = cache.load_or_store("k", t(11), || Ok::<_, ()>("second")).unwrap();
        assert_eq!(v, "second");
    }

    #[test]
    fn failed_compute_keeps_previous_value() {
        let cache = Cache::new();
        cache.store("k", t(1), 1u32);
        let err = cache.load_or_store("k", t(2), || Err::<u32, _>("boom"));
        assert_eq!(err, Err("boom"));
        assert_eq!(cache.load(&"k"), Some(1));

        // the failed attempt did not advance the mtime
        assert_eq!(cache.load_or_store("k", t(2), || Ok::<_, ()>(2)), Ok(2));
    }

    #[test]
    fn store_overwrites_and_remove_forgets() {
        let cache = Cache::new();
        cache.store("k", t(10), 1u32);
        cache.store("k", t(1), 2u32);
        assert_eq!(cache.load(&"k"), Some(2));
        assert_eq!(cache.len(), 1);
        cache.remove(&"k");
        assert!(cache.is_empty());
        assert_eq!(cache.load(&"k"), None);
    }
}
