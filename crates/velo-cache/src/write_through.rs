//! Two-tier write-through cache composition.
//!
//! Composes a small fast tier (T1, typically the in-process LRU) over a
//! larger tier (T2, typically shared or persistent). Reads check T1
//! first and promote T2 hits into T1 when they fit under the configured
//! size cutoff; writes always reach T2.

use crate::backend::{CacheBackend, KeyState};
use crate::Result;
use bytes::Bytes;

/// Write-through composition of two cache tiers.
pub struct WriteThroughCache<B1, B2> {
    cache1: B1,
    cache2: B2,
    /// Entries whose key+value size meets or exceeds this are kept out
    /// of T1. `None` disables the cutoff.
    cache1_size_limit: Option<usize>,
}

impl<B1, B2> WriteThroughCache<B1, B2> {
    /// Composes `cache1` (fast tier) over `cache2` (authoritative
    /// tier) with no promotion cutoff.
    pub fn new(cache1: B1, cache2: B2) -> Self {
        Self {
            cache1,
            cache2,
            cache1_size_limit: None,
        }
    }

    /// Sets the T1 promotion size cutoff.
    pub fn set_cache1_size_limit(&mut self, limit: Option<usize>) {
        self.cache1_size_limit = limit;
    }

    /// Returns the fast tier.
    pub fn cache1(&self) -> &B1 {
        &self.cache1
    }

    /// Returns the authoritative tier.
    pub fn cache2(&self) -> &B2 {
        &self.cache2
    }

    fn fits_cache1(&self, key: &str, value: &Bytes) -> bool {
        match self.cache1_size_limit {
            None => true,
            Some(limit) => key.len() + value.len() < limit,
        }
    }
}

impl<B1: CacheBackend, B2: CacheBackend> CacheBackend for WriteThroughCache<B1, B2> {
    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        if let Some(value) = self.cache1.get(key)? {
            return Ok(Some(value));
        }
        match self.cache2.get(key)? {
            Some(value) => {
                if self.fits_cache1(key, &value) {
                    self.cache1.put(key, value.clone())?;
                }
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: Bytes) -> Result<()> {
        if self.fits_cache1(key, &value) {
            self.cache1.put(key, value.clone())?;
        }
        self.cache2.put(key, value)
    }

    fn mark_in_transit(&self, key: &str) -> Result<()> {
        self.cache1.mark_in_transit(key)?;
        self.cache2.mark_in_transit(key)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let deleted1 = self.cache1.delete(key)?;
        let deleted2 = self.cache2.delete(key)?;
        Ok(deleted1 || deleted2)
    }

    fn query(&self, key: &str) -> Result<KeyState> {
        match self.cache1.query(key)? {
            KeyState::Available => Ok(KeyState::Available),
            state1 => match self.cache2.query(key)? {
                // A T2 value only counts once it has been pulled
                // through T1, so a confirming read does the promotion.
                KeyState::Available => match self.get(key)? {
                    Some(_) => Ok(KeyState::Available),
                    None => Ok(state1),
                },
                // The less pessimistic of the two states wins.
                KeyState::InTransit => Ok(KeyState::InTransit),
                KeyState::NotFound => Ok(state1),
            },
        }
    }
}
