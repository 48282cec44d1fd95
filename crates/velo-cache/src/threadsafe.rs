//! Mutex-serializing cache wrapper.
//!
//! Some backends are not internally synchronized, and slot rendering
//! may run on any worker, so every operation on such a backend must go
//! through a single mutex.

use crate::backend::{CacheBackend, KeyState};
use crate::Result;
use bytes::Bytes;
use parking_lot::Mutex;

/// Serializes all operations on the wrapped backend under one mutex.
pub struct ThreadsafeCache<B> {
    inner: B,
    mutex: Mutex<()>,
}

impl<B> ThreadsafeCache<B> {
    /// Wraps a backend.
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            mutex: Mutex::new(()),
        }
    }

    /// Returns the wrapped backend.
    pub fn inner(&self) -> &B {
        &self.inner
    }
}

impl<B: CacheBackend> CacheBackend for ThreadsafeCache<B> {
    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let _guard = self.mutex.lock();
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: Bytes) -> Result<()> {
        let _guard = self.mutex.lock();
        self.inner.put(key, value)
    }

    fn mark_in_transit(&self, key: &str) -> Result<()> {
        let _guard = self.mutex.lock();
        self.inner.mark_in_transit(key)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let _guard = self.mutex.lock();
        self.inner.delete(key)
    }

    fn query(&self, key: &str) -> Result<KeyState> {
        let _guard = self.mutex.lock();
        self.inner.query(key)
    }
}
