//! HTTP cache stack for Velo.
//!
//! This crate provides the storage side of the rewriting engine: the
//! packed header/body value format, HTTP freshness rules, a pluggable
//! byte-cache interface with an in-process LRU implementation, and the
//! threadsafe and write-through compositions layered on top.

mod backend;
mod error;
mod headers;
mod http_cache;
mod lru_backend;
mod threadsafe;
mod value;
mod write_through;

pub use backend::{CacheBackend, KeyState};
pub use error::CacheError;
pub use headers::ResponseHeaders;
pub use http_cache::{CacheLookup, HttpCache, HttpCacheStats};
pub use lru_backend::{LruBackend, LruConfig, LruStats};
pub use threadsafe::ThreadsafeCache;
pub use value::HttpValue;
pub use write_through::WriteThroughCache;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Milliseconds since the Unix epoch, the time base used throughout
/// the cache stack.
#[must_use]
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
