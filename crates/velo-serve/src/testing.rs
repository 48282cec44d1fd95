//! Test doubles shared by the fetch-path tests.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use velo_cache::{CacheBackend, HttpCache, LruBackend};
use velo_lock::{InMemoryLockManager, LockManager};
use velo_rewrite::{
    DomainPolicy, FetchedResource, ResourceFetcher, RewriteEngine, RewriteError,
};
use velo_types::RewriteOptions;

/// Canned-response fetcher counting origin hits.
pub(crate) struct MockFetcher {
    responses: Mutex<HashMap<String, FetchedResource>>,
    pub(crate) fetches: AtomicUsize,
}

impl MockFetcher {
    pub(crate) fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn insert(&self, url: &str, resource: FetchedResource) {
        self.responses.lock().insert(url.to_string(), resource);
    }
}

#[async_trait::async_trait]
impl ResourceFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedResource, RewriteError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.responses
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| RewriteError::FetchFailed {
                url: url.to_string(),
                reason: "no canned response".to_string(),
            })
    }
}

/// Engine over an in-memory cache, in-process locks, and a canned
/// fetcher.
pub(crate) fn test_engine() -> (RewriteEngine, Arc<MockFetcher>) {
    let backend: Arc<dyn CacheBackend> = Arc::new(LruBackend::with_defaults());
    let locks: Arc<dyn LockManager> = Arc::new(InMemoryLockManager::new());
    let fetcher = Arc::new(MockFetcher::new());
    let engine = RewriteEngine::new(
        Arc::new(HttpCache::new(backend)),
        locks,
        Arc::clone(&fetcher) as Arc<dyn ResourceFetcher>,
        DomainPolicy::new(),
        RewriteOptions::default(),
    );
    (engine, fetcher)
}

/// An "image" whose back half is zero padding, so the stand-in
/// optimizer has something to strip.
pub(crate) fn padded_png() -> Vec<u8> {
    let mut bytes = vec![0x89u8; 5 * 1024];
    bytes.extend(std::iter::repeat(0u8).take(5 * 1024));
    bytes
}
