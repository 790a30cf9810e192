//! Bounded TTL cache shared by concurrent requests.
//!
//! Least-recently-accessed eviction via `lru` (a hit moves the entry to the
//! front of the recency list), per-entry TTL checked lazily on
//! read, plus `purge_expired` for the periodic sweep. Locks are never held
//! across an await point; acquisition is bounded by a timeout so a stuck lock
//! degrades into a cache miss instead of stalling the request.

use crate::error::CacheError;
use lru::LruCache;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Canonical form of user text used for cache keys: trimmed, inner whitespace
/// collapsed, lowercased.
pub fn canonicalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) > self.ttl
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub name: &'static str,
    pub entries: usize,
    pub capacity: usize,
    pub insertions: u64,
    pub evictions: u64,
    pub expirations: u64,
}

pub struct CacheManager<K, V> {
    name: &'static str,
    inner: Mutex<LruCache<K, CacheEntry<V>>>,
    capacity: usize,
    lock_timeout: Duration,
    insertions: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<K, V> CacheManager<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// * `capacity` - maximum number of live entries (at least 1)
    /// * `lock_timeout` - how long an operation waits for the lock before giving up
    pub fn new(name: &'static str, capacity: usize, lock_timeout: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            inner: Mutex::new(LruCache::new(capacity)),
            capacity: capacity.get(),
            lock_timeout,
            insertions: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn lock(&self) -> Result<MutexGuard<'_, LruCache<K, CacheEntry<V>>>, CacheError> {
        self.inner
            .try_lock_for(self.lock_timeout)
            .ok_or(CacheError::LockTimeout {
                cache: self.name,
                waited_ms: self.lock_timeout.as_millis() as u64,
            })
    }

    /// Get a live value. Expired entries are dropped and reported as a miss.
    pub fn get(&self, key: &K) -> Result<Option<V>, CacheError> {
        let mut cache = self.lock()?;
        let now = Instant::now();

        match cache.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }

        cache.pop(key);
        self.expirations.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    /// Insert or replace a value with its own TTL. A zero TTL stores nothing.
    pub fn put(&self, key: K, value: V, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Ok(());
        }

        let mut cache = self.lock()?;
        let now = Instant::now();

        if !cache.contains(&key) && cache.len() >= self.capacity && cache.pop_lru().is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        cache.put(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                ttl,
            },
        );
        self.insertions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Drop every entry. Counters are monotonic and survive.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let mut cache = self.inner.lock();
        let now = Instant::now();

        let expired: Vec<K> = cache
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            cache.pop(key);
        }
        self.expirations
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            name: self.name,
            entries: self.len(),
            capacity: self.capacity,
            insertions: self.insertions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

/// A cache lock held by a background thread until released.
#[cfg(test)]
pub(crate) struct HeldLock {
    release: std::sync::mpsc::Sender<()>,
    holder: std::thread::JoinHandle<()>,
}

#[cfg(test)]
impl HeldLock {
    pub(crate) fn release(self) {
        let _ = self.release.send(());
        let _ = self.holder.join();
    }
}

/// Take `cache`'s lock on another thread; returns once the lock is held.
#[cfg(test)]
pub(crate) fn hold_lock<K, V>(cache: &std::sync::Arc<CacheManager<K, V>>) -> HeldLock
where
    K: Send + 'static,
    V: Send + 'static,
{
    use std::sync::mpsc;

    let cache = std::sync::Arc::clone(cache);
    let (locked_tx, locked_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let holder = std::thread::spawn(move || {
        let _guard = cache.inner.lock();
        let _ = locked_tx.send(());
        let _ = release_rx.recv();
    });
    let _ = locked_rx.recv();
    HeldLock {
        release: release_tx,
        holder,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const LONG: Duration = Duration::from_secs(60);

    fn cache(capacity: usize) -> CacheManager<String, u32> {
        CacheManager::new("test", capacity, Duration::from_millis(20))
    }

    #[test]
    fn test_canonicalize() {
        assert_eq!(canonicalize("  What are   your\tPricing plans? "), "what are your pricing plans?");
        assert_eq!(canonicalize("HELLO"), canonicalize("hello"));
    }

    #[test]
    fn test_put_then_get() {
        let cache = cache(10);
        cache.put("a".to_string(), 1, LONG).unwrap();
        assert_eq!(cache.get(&"a".to_string()).unwrap(), Some(1));
        assert_eq!(cache.get(&"b".to_string()).unwrap(), None);
    }

    #[test]
    fn test_expired_entry_is_invisible() {
        let cache = cache(10);
        cache.put("a".to_string(), 1, Duration::from_millis(30)).unwrap();
        cache.put("b".to_string(), 2, LONG).unwrap();
        thread::sleep(Duration::from_millis(60));

        assert_eq!(cache.get(&"a".to_string()).unwrap(), None);
        assert_eq!(cache.get(&"b".to_string()).unwrap(), Some(2));
        assert_eq!(cache.stats().expirations, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_least_recently_accessed_is_evicted() {
        let cache = cache(2);
        cache.put("a".to_string(), 1, LONG).unwrap();
        cache.put("b".to_string(), 2, LONG).unwrap();
        // touch "a" so "b" becomes the eviction candidate
        cache.get(&"a".to_string()).unwrap();
        cache.put("c".to_string(), 3, LONG).unwrap();

        assert_eq!(cache.get(&"a".to_string()).unwrap(), Some(1));
        assert_eq!(cache.get(&"b".to_string()).unwrap(), None);
        assert_eq!(cache.get(&"c".to_string()).unwrap(), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_replacing_key_does_not_evict() {
        let cache = cache(2);
        cache.put("a".to_string(), 1, LONG).unwrap();
        cache.put("b".to_string(), 2, LONG).unwrap();
        cache.put("a".to_string(), 10, LONG).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&"a".to_string()).unwrap(), Some(10));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_zero_ttl_is_not_stored() {
        let cache = cache(2);
        cache.put("a".to_string(), 1, Duration::ZERO).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let cache = cache(10);
        for i in 0..5 {
            cache.put(format!("short_{}", i), i, Duration::from_millis(10)).unwrap();
        }
        cache.put("long".to_string(), 99, LONG).unwrap();
        thread::sleep(Duration::from_millis(40));

        assert_eq!(cache.purge_expired(), 5);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear_keeps_counters() {
        let cache = cache(10);
        cache.put("a".to_string(), 1, LONG).unwrap();
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().insertions, 1);
    }

    #[test]
    fn test_lock_timeout_surfaces_as_error() {
        let cache = cache(10);
        let _held = cache.inner.lock();
        let err = cache.get(&"a".to_string()).unwrap_err();
        assert_eq!(err, CacheError::LockTimeout { cache: "test", waited_ms: 20 });
    }

    #[test]
    fn test_lock_held_by_another_thread_times_out_then_recovers() {
        let cache = Arc::new(cache(10));
        let held = hold_lock(&cache);

        assert!(cache.put("a".to_string(), 1, LONG).is_err());
        held.release();

        cache.put("a".to_string(), 1, LONG).unwrap();
        assert_eq!(cache.get(&"a".to_string()).unwrap(), Some(1));
        assert_eq!(cache.name(), "test");
    }

    #[test]
    fn test_concurrent_access_respects_capacity() {
        let cache = Arc::new(CacheManager::<String, usize>::new("shared", 32, Duration::from_secs(1)));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..200 {
                        let key = format!("k{}", (t * 7 + i) % 64);
                        cache.put(key.clone(), i, LONG).unwrap();
                        if let Some(v) = cache.get(&key).unwrap() {
                            assert!(v < 200);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = cache.stats();
        assert!(stats.entries <= 32);
        assert_eq!(stats.insertions, 8 * 200);
    }
}
