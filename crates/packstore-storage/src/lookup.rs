//! Lookup cache for location descriptors
//!
//! Fronts the metadata store on the read path. Keys are `<set>#<hash>`,
//! values are descriptor strings. Only present records are cached; a miss in
//! the metadata store never populates the cache.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Key → descriptor cache consulted before the metadata store
pub trait LookupCache: Send + Sync {
    /// Cached value for `key`, if present and fresh
    fn get(&self, key: &str) -> Option<String>;

    /// Insert or replace a value
    fn put(&self, key: String, value: String);

    /// Number of cached entries, expired ones included until purged
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lookup cache statistics
#[derive(Debug, Default)]
pub struct LookupStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    /// Entries dropped for capacity
    pub evictions: AtomicU64,
    /// Entries dropped for age
    pub expirations: AtomicU64,
}

impl LookupStats {
    /// Hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }
}

struct LookupEntry {
    value: String,
    inserted: Instant,
    last_access: AtomicU64,
}

impl LookupEntry {
    fn touch(&self, clock: u64) {
        self.last_access.store(clock, Ordering::Relaxed);
    }
}

struct Entries {
    map: HashMap<String, LookupEntry>,
    last_purge: Instant,
}

/// Bounded LRU cache whose entries expire after a fixed time-to-live
pub struct TtlLookupCache {
    entries: RwLock<Entries>,
    capacity: usize,
    ttl: Duration,
    cleanup_interval: Duration,
    /// Logical clock for LRU ordering
    clock: AtomicU64,
    stats: LookupStats,
}

impl TtlLookupCache {
    /// Create a cache holding at most `capacity` entries
    pub fn new(capacity: usize, ttl: Duration, cleanup_interval: Duration) -> Self {
        Self {
            entries: RwLock::new(Entries {
                map: HashMap::new(),
                last_purge: Instant::now(),
            }),
            capacity,
            ttl,
            cleanup_interval,
            clock: AtomicU64::new(0),
            stats: LookupStats::default(),
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> &LookupStats {
        &self.stats
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn is_expired(&self, entry: &LookupEntry, now: Instant) -> bool {
        now.duration_since(entry.inserted) >= self.ttl
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write();
        self.purge_locked(&mut entries, Instant::now())
    }

    fn purge_locked(&self, entries: &mut Entries, now: Instant) -> usize {
        let before = entries.map.len();
        entries
            .map
            .retain(|_, entry| now.duration_since(entry.inserted) < self.ttl);
        entries.last_purge = now;
        let removed = before - entries.map.len();
        self.stats
            .expirations
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    fn find_lru_entry(entries: &Entries) -> Option<String> {
        entries
            .map
            .iter()
            .min_by_key(|(_, entry)| entry.last_access.load(Ordering::Relaxed))
            .map(|(key, _)| key.clone())
    }
}

impl LookupCache for TtlLookupCache {
    fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.map.get(key) {
                Some(entry) if !self.is_expired(entry, now) => {
                    entry.touch(self.tick());
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    self.stats.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Stale: drop it unless a fresh put replaced it meanwhile
        let mut entries = self.entries.write();
        if let Some(entry) = entries.map.get(key)
            && self.is_expired(entry, now)
        {
            entries.map.remove(key);
            self.stats.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn put(&self, key: String, value: String) {
        if self.capacity == 0 {
            return;
        }
        let clock = self.tick();
        let now = Instant::now();
        let mut entries = self.entries.write();

        if now.duration_since(entries.last_purge) >= self.cleanup_interval {
            self.purge_locked(&mut entries, now);
        }

        if !entries.map.contains_key(&key) {
            while entries.map.len() >= self.capacity {
                match Self::find_lru_entry(&entries) {
                    Some(evict_key) => {
                        entries.map.remove(&evict_key);
                        self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                    None => break,
                }
            }
        }

        entries.map.insert(
            key,
            LookupEntry {
                value,
                inserted: now,
                last_access: AtomicU64::new(clock),
            },
        );
    }

    fn len(&self) -> usize {
        self.entries.read().map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn cache(capacity: usize, ttl_ms: u64) -> TtlLookupCache {
        TtlLookupCache::new(
            capacity,
            Duration::from_millis(ttl_ms),
            Duration::from_secs(3600),
        )
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = cache(10, 60_000);
        assert_eq!(cache.get("photos#abc"), None);
        cache.put("photos#abc".into(), "1#photos#n#1#0#0#5".into());
        assert_eq!(cache.get("photos#abc").as_deref(), Some("1#photos#n#1#0#0#5"));
        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 1);
        assert!((cache.stats().hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = cache(2, 60_000);
        cache.put("a".into(), "1".into());
        cache.put("b".into(), "2".into());
        // Touch "a" so "b" becomes least recently used
        assert!(cache.get("a").is_some());
        cache.put("c".into(), "3".into());

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_replace_does_not_evict() {
        let cache = cache(2, 60_000);
        cache.put("a".into(), "1".into());
        cache.put("b".into(), "2".into());
        cache.put("a".into(), "3".into());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").as_deref(), Some("3"));
        assert_eq!(cache.stats().evictions.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_expiry() {
        let cache = cache(10, 20);
        cache.put("a".into(), "1".into());
        thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get("a"), None);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_periodic_purge_on_put() {
        let cache = TtlLookupCache::new(10, Duration::from_millis(200), Duration::ZERO);
        cache.put("a".into(), "1".into());
        cache.put("b".into(), "2".into());
        thread::sleep(Duration::from_millis(250));
        cache.put("c".into(), "3".into());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_expired(), 0);
    }

    #[test]
    fn test_zero_capacity_caches_nothing() {
        let cache = cache(0, 60_000);
        cache.put("a".into(), "1".into());
        assert!(cache.is_empty());
    }
}
