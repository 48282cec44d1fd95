//! Freshness-enforcing HTTP cache.
//!
//! Layers HTTP caching semantics over a byte [`CacheBackend`]: entries
//! carry their origin headers, lookups only succeed while the origin's
//! freshness lifetime holds, and origin fetch failures can be
//! remembered briefly to avoid retry storms. The cache never returns a
//! stale entry; revalidation is the origin fetcher's concern.

use crate::backend::{CacheBackend, KeyState};
use crate::headers::{format_http_date, ResponseHeaders};
use crate::value::HttpValue;
use crate::Result;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;
use velo_types::cache_key;

/// Header marking a remembered fetch failure.
const FAILURE_MARKER: &str = "X-Velo-Fetch-Failed";

/// Outcome of an HTTP cache lookup.
#[derive(Debug)]
pub enum CacheLookup {
    /// A fresh entry was found.
    Hit {
        headers: ResponseHeaders,
        body: Bytes,
    },
    /// A recent fetch failure is being remembered for this key;
    /// callers should not retry the origin yet.
    RecentFailure,
    /// No usable entry.
    Miss,
}

impl CacheLookup {
    /// True for `Hit`.
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit { .. })
    }
}

/// Counters exported by the HTTP cache.
#[derive(Debug, Default)]
struct HttpCacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    inserts: AtomicU64,
    deletes: AtomicU64,
    remembered_failures: AtomicU64,
}

/// Snapshot of HTTP cache counters.
#[derive(Debug, Clone, Default)]
pub struct HttpCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub inserts: u64,
    pub deletes: u64,
    pub remembered_failures: u64,
}

/// HTTP cache over a pluggable byte backend.
pub struct HttpCache<B> {
    backend: B,
    force_caching: AtomicBool,
    metrics: HttpCacheMetrics,
}

impl<B: CacheBackend> HttpCache<B> {
    /// Creates an HTTP cache over `backend`.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            force_caching: AtomicBool::new(false),
            metrics: HttpCacheMetrics::default(),
        }
    }

    /// Bypass freshness checks on reads (diagnostic and
    /// negative-caching use).
    pub fn set_force_caching(&self, force: bool) {
        self.force_caching.store(force, Ordering::Relaxed);
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Looks up `key`, enforcing freshness.
    pub fn get(&self, key: &str, now_ms: u64) -> Result<CacheLookup> {
        let stored = match self.backend.get(&cache_key(key))? {
            Some(stored) => stored,
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(CacheLookup::Miss);
            }
        };

        let mut value = HttpValue::new();
        if !value.link(&stored) {
            // Corrupt entries read as absent.
            debug!(key, "dropping corrupt cache entry");
            self.metrics.misses.fetch_add(1, Ordering::Relaxed);
            let _ = self.backend.delete(&cache_key(key));
            return Ok(CacheLookup::Miss);
        }

        let headers = match value.extract_headers() {
            Ok(Some(headers)) => headers,
            Ok(None) | Err(_) => {
                // Undecodable entries read as absent.
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                let _ = self.backend.delete(&cache_key(key));
                return Ok(CacheLookup::Miss);
            }
        };

        if headers.get(FAILURE_MARKER).is_some() {
            if headers.is_currently_valid(now_ms) {
                self.metrics
                    .remembered_failures
                    .fetch_add(1, Ordering::Relaxed);
                return Ok(CacheLookup::RecentFailure);
            }
            self.metrics.expirations.fetch_add(1, Ordering::Relaxed);
            return Ok(CacheLookup::Miss);
        }

        let force = self.force_caching.load(Ordering::Relaxed);
        if !force && !headers.is_currently_valid(now_ms) {
            self.metrics.expirations.fetch_add(1, Ordering::Relaxed);
            return Ok(CacheLookup::Miss);
        }

        let body = value.body_bytes()?.unwrap_or_default();
        self.metrics.hits.fetch_add(1, Ordering::Relaxed);
        Ok(CacheLookup::Hit { headers, body })
    }

    /// Inserts an entry, stamping a `Date` header if the origin did
    /// not provide one.
    pub fn put(&self, key: &str, headers: &ResponseHeaders, body: &[u8], now_ms: u64) -> Result<()> {
        let mut headers = headers.clone();
        if headers.date_ms().is_none() {
            headers.set("Date", &format_http_date(now_ms));
        }

        let mut value = HttpValue::new();
        value.set_headers(&headers)?;
        value.write(body);
        let stored = value.share()?;

        self.backend.put(&cache_key(key), stored)?;
        self.metrics.inserts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Records a short-lived negative entry for a failed origin fetch.
    pub fn put_failure(&self, key: &str, ttl_ms: u64, now_ms: u64) -> Result<()> {
        let mut headers = ResponseHeaders::new(200);
        headers.add(FAILURE_MARKER, "1");
        headers.add("Date", &format_http_date(now_ms));
        headers.add(
            "Cache-Control",
            &format!("max-age={}", ttl_ms.div_ceil(1000)),
        );
        self.put(key, &headers, b"", now_ms)
    }

    /// Announces that `key` is being produced.
    pub fn mark_in_transit(&self, key: &str) -> Result<()> {
        self.backend.mark_in_transit(&cache_key(key))
    }

    /// Probes the state of `key`, downgrading stale entries to
    /// `NotFound`.
    pub fn query(&self, key: &str, now_ms: u64) -> Result<KeyState> {
        match self.backend.query(&cache_key(key))? {
            KeyState::Available => match self.get(key, now_ms)? {
                CacheLookup::Hit { .. } | CacheLookup::RecentFailure => Ok(KeyState::Available),
                CacheLookup::Miss => Ok(KeyState::NotFound),
            },
            other => Ok(other),
        }
    }

    /// Removes an entry.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let deleted = self.backend.delete(&cache_key(key))?;
        if deleted {
            self.metrics.deletes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(deleted)
    }

    /// Returns current counters.
    pub fn stats(&self) -> HttpCacheStats {
        HttpCacheStats {
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            expirations: self.metrics.expirations.load(Ordering::Relaxed),
            inserts: self.metrics.inserts.load(Ordering::Relaxed),
            deletes: self.metrics.deletes.load(Ordering::Relaxed),
            remembered_failures: self.metrics.remembered_failures.load(Ordering::Relaxed),
        }
    }
}
