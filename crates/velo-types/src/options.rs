//! Rewrite option set.

use crate::error::TypesError;
use crate::Result;
use serde::{Deserialize, Serialize};

/// Tunable options shared by the cache stack, the rewrite driver, and
/// the fetch path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteOptions {
    /// Bypass HTTP freshness checks on cache reads.
    pub force_caching: bool,
    /// Size cutoff for promotion into the fast write-through tier.
    /// `None` disables the cutoff.
    pub cache1_size_limit: Option<usize>,
    /// Per-flush rewrite wait budget in milliseconds.
    pub flush_deadline_ms: u64,
    /// Age threshold after which a held named lock may be stolen.
    pub lock_steal_ms: u64,
    /// Length of the encoded hash field (10..=43 characters).
    pub hash_length_chars: usize,
    /// Resources whose encoded URL would exceed this are not rewritten.
    pub max_output_url_length: usize,
    /// TTL for negative cache entries recorded on origin failure.
    pub negative_cache_ttl_ms: u64,
    /// Timeout for origin fetches.
    pub fetch_timeout_ms: u64,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self {
            force_caching: false,
            cache1_size_limit: None,
            flush_deadline_ms: 500,
            lock_steal_ms: 30_000,
            hash_length_chars: 10,
            max_output_url_length: 2_048,
            negative_cache_ttl_ms: 300_000,
            fetch_timeout_ms: 5_000,
        }
    }
}

impl RewriteOptions {
    /// Validates option ranges.
    pub fn validate(&self) -> Result<()> {
        if !(10..=43).contains(&self.hash_length_chars) {
            return Err(TypesError::InvalidOption {
                name: "hash_length_chars",
                reason: format!("{} is outside 10..=43", self.hash_length_chars),
            });
        }
        if self.max_output_url_length == 0 {
            return Err(TypesError::InvalidOption {
                name: "max_output_url_length",
                reason: "must be nonzero".to_string(),
            });
        }
        Ok(())
    }
}
