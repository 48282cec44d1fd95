//! In-process LRU cache tier.
//!
//! Byte-size-bounded LRU map used as the fast tier of the write-through
//! composition, and as the only tier in single-process deployments.

use crate::backend::{CacheBackend, KeyState};
use crate::Result;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Configuration for the LRU tier.
#[derive(Debug, Clone)]
pub struct LruConfig {
    /// Maximum number of entries.
    pub max_entries: usize,
    /// Maximum total size of stored values in bytes.
    pub max_bytes: usize,
}

impl Default for LruConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_bytes: 64 * 1024 * 1024, // 64 MB
        }
    }
}

/// Counters for the LRU tier.
#[derive(Debug, Default)]
struct LruMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Snapshot of LRU tier counters.
#[derive(Debug, Clone, Default)]
pub struct LruStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
enum Slot {
    Ready(Bytes),
    InTransit,
}

impl Slot {
    fn size(&self) -> usize {
        match self {
            Slot::Ready(bytes) => bytes.len(),
            Slot::InTransit => 0,
        }
    }
}

/// Byte-bounded LRU cache backend.
pub struct LruBackend {
    entries: Mutex<LruCache<String, Slot>>,
    current_bytes: AtomicU64,
    config: LruConfig,
    metrics: LruMetrics,
}

impl LruBackend {
    /// Creates an LRU backend with the given configuration.
    pub fn new(config: LruConfig) -> Self {
        let max_entries = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(max_entries)),
            current_bytes: AtomicU64::new(0),
            config,
            metrics: LruMetrics::default(),
        }
    }

    /// Creates an LRU backend with default limits.
    pub fn with_defaults() -> Self {
        Self::new(LruConfig::default())
    }

    /// Returns current counters.
    pub fn stats(&self) -> LruStats {
        let entries = self.entries.lock();
        LruStats {
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            evictions: self.metrics.evictions.load(Ordering::Relaxed),
            entries: entries.len(),
            bytes: self.current_bytes.load(Ordering::Relaxed),
        }
    }

    /// Drops all entries.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.clear();
        self.current_bytes.store(0, Ordering::Relaxed);
    }

    fn insert_slot(&self, key: &str, slot: Slot) {
        let size = slot.size() as u64;
        let mut entries = self.entries.lock();

        // Evict until the new value fits.
        while self.current_bytes.load(Ordering::Relaxed) + size > self.config.max_bytes as u64 {
            if let Some((_, evicted)) = entries.pop_lru() {
                self.current_bytes
                    .fetch_sub(evicted.size() as u64, Ordering::Relaxed);
                self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
            } else {
                break;
            }
        }

        if let Some(old) = entries.put(key.to_string(), slot) {
            self.current_bytes
                .fetch_sub(old.size() as u64, Ordering::Relaxed);
        }
        self.current_bytes.fetch_add(size, Ordering::Relaxed);
    }
}

impl CacheBackend for LruBackend {
    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(Slot::Ready(bytes)) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(bytes.clone()))
            }
            _ => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.insert_slot(key, Slot::Ready(value));
        Ok(())
    }

    fn mark_in_transit(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        if matches!(entries.peek(key), Some(Slot::Ready(_))) {
            return Ok(());
        }
        entries.put(key.to_string(), Slot::InTransit);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock();
        if let Some(slot) = entries.pop(key) {
            self.current_bytes
                .fetch_sub(slot.size() as u64, Ordering::Relaxed);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn query(&self, key: &str) -> Result<KeyState> {
        let entries = self.entries.lock();
        Ok(match entries.peek(key) {
            Some(Slot::Ready(_)) => KeyState::Available,
            Some(Slot::InTransit) => KeyState::InTransit,
            None => KeyState::NotFound,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_roundtrip() {
        let cache = LruBackend::with_defaults();
        cache.put("k", Bytes::from_static(b"value")).unwrap();
        assert_eq!(cache.get("k").unwrap().unwrap().as_ref(), b"value");
        assert_eq!(cache.query("k").unwrap(), KeyState::Available);
    }

    #[test]
    fn miss_records_metrics() {
        let cache = LruBackend::with_defaults();
        assert!(cache.get("absent").unwrap().is_none());
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[test]
    fn in_transit_state() {
        let cache = LruBackend::with_defaults();
        cache.mark_in_transit("k").unwrap();
        assert_eq!(cache.query("k").unwrap(), KeyState::InTransit);
        assert!(cache.get("k").unwrap().is_none());

        // Put replaces the marker.
        cache.put("k", Bytes::from_static(b"done")).unwrap();
        assert_eq!(cache.query("k").unwrap(), KeyState::Available);
    }

    #[test]
    fn in_transit_does_not_clobber_value() {
        let cache = LruBackend::with_defaults();
        cache.put("k", Bytes::from_static(b"value")).unwrap();
        cache.mark_in_transit("k").unwrap();
        assert_eq!(cache.query("k").unwrap(), KeyState::Available);
    }

    #[test]
    fn delete_removes() {
        let cache = LruBackend::with_defaults();
        cache.put("k", Bytes::from_static(b"value")).unwrap();
        assert!(cache.delete("k").unwrap());
        assert!(!cache.delete("k").unwrap());
        assert_eq!(cache.query("k").unwrap(), KeyState::NotFound);
    }

    #[test]
    fn byte_bound_evicts_lru() {
        let cache = LruBackend::new(LruConfig {
            max_entries: 100,
            max_bytes: 10,
        });
        cache.put("a", Bytes::from_static(b"12345")).unwrap();
        cache.put("b", Bytes::from_static(b"12345")).unwrap();
        // Third entry pushes total past 10 bytes; "a" is the LRU victim.
        cache.put("c", Bytes::from_static(b"12345")).unwrap();
        assert_eq!(cache.query("a").unwrap(), KeyState::NotFound);
        assert_eq!(cache.query("c").unwrap(), KeyState::Available);
        assert!(cache.stats().evictions >= 1);
    }
}
