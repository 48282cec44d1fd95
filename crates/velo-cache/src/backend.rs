//! Byte-cache backend trait.
//!
//! Defines the interface every cache tier implements, enabling the
//! threadsafe and write-through compositions to wrap any backend.

use crate::Result;
use bytes::Bytes;
use std::sync::Arc;

/// Result of a non-fetching cache probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// The key holds a readable value.
    Available,
    /// A writer has announced the key but the value is not readable
    /// yet. Callers may choose to wait rather than race a rebuild.
    InTransit,
    /// The key is absent.
    NotFound,
}

/// Trait for byte-addressable cache backends.
///
/// Implementations include the in-process LRU tier and the threadsafe
/// and write-through wrappers.
pub trait CacheBackend: Send + Sync {
    /// Retrieves the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Stores `value` under `key`, replacing any previous value or
    /// in-transit marker.
    fn put(&self, key: &str, value: Bytes) -> Result<()>;

    /// Announces that a value for `key` is being produced. A no-op if
    /// the key already holds a value.
    fn mark_in_transit(&self, key: &str) -> Result<()>;

    /// Removes `key`. Returns true if something was removed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Probes the state of `key` without reading the value.
    fn query(&self, key: &str) -> Result<KeyState>;
}

// Implement CacheBackend for Arc<T> where T: CacheBackend
impl<T: CacheBackend> CacheBackend for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: Bytes) -> Result<()> {
        (**self).put(key, value)
    }

    fn mark_in_transit(&self, key: &str) -> Result<()> {
        (**self).mark_in_transit(key)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        (**self).delete(key)
    }

    fn query(&self, key: &str) -> Result<KeyState> {
        (**self).query(key)
    }
}

impl CacheBackend for Arc<dyn CacheBackend> {
    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: Bytes) -> Result<()> {
        (**self).put(key, value)
    }

    fn mark_in_transit(&self, key: &str) -> Result<()> {
        (**self).mark_in_transit(key)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        (**self).delete(key)
    }

    fn query(&self, key: &str) -> Result<KeyState> {
        (**self).query(key)
    }
}
