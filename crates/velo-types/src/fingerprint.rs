//! Deterministic fingerprints and content digests.
//!
//! A fingerprint identifies one rewrite: it is a function of the
//! canonical input URLs, the filter identity, and any filter-specific
//! parameters. Equal fingerprints must produce byte-identical optimized
//! output, which is what makes the fingerprint usable as both the cache
//! key and the named-lock key.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Cache keys longer than this are replaced by their digest.
const MAX_KEY_LEN: usize = 256;

/// Marker prefix for digested over-length keys.
const HASHED_KEY_MARKER: char = '#';

/// Deterministic identity of one rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Length of the rendered fingerprint in characters.
    pub const LEN: usize = 22;

    /// Computes the fingerprint of a rewrite.
    ///
    /// `inputs` are the canonical absolute URLs being rewritten (order
    /// matters: it is the discovery order within the document for
    /// combining filters). `filter_id` is the short filter identifier,
    /// and `params` carries filter-specific context such as device
    /// class or target dimensions.
    #[must_use]
    pub fn compute(inputs: &[&str], filter_id: &str, params: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        for url in inputs {
            hasher.update(url.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(filter_id.as_bytes());
        for param in params {
            hasher.update([0u8]);
            hasher.update(param.as_bytes());
        }
        let digest = hasher.finalize();
        let mut encoded = URL_SAFE_NO_PAD.encode(digest);
        encoded.truncate(Self::LEN);
        Self(encoded)
    }

    /// Wraps an already-rendered fingerprint string.
    #[must_use]
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Returns the rendered form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Digest of optimized output bytes, rendered as base64url and
/// truncated to the deployment's configured hash length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Computes the digest of optimized bytes, truncated to
    /// `hash_length_chars`.
    #[must_use]
    pub fn compute(data: &[u8], hash_length_chars: usize) -> Self {
        let digest = Sha256::digest(data);
        let mut encoded = URL_SAFE_NO_PAD.encode(digest);
        encoded.truncate(hash_length_chars);
        Self(encoded)
    }

    /// Returns the rendered hash field.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bounds a cache key to the backend's key-length limit.
///
/// Keys at or under the bound pass through unchanged; longer keys are
/// replaced by a marker byte followed by their digest, so that the
/// result is still deterministic in the input.
#[must_use]
pub fn cache_key(raw: &str) -> String {
    if raw.len() <= MAX_KEY_LEN {
        raw.to_string()
    } else {
        let digest = Sha256::digest(raw.as_bytes());
        format!("{}{}", HASHED_KEY_MARKER, URL_SAFE_NO_PAD.encode(digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_deterministic() {
        let a = Fingerprint::compute(&["http://o.com/a.png"], "ic", &[]);
        let b = Fingerprint::compute(&["http://o.com/a.png"], "ic", &[]);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), Fingerprint::LEN);
    }

    #[test]
    fn fingerprint_sensitive_to_all_parts() {
        let base = Fingerprint::compute(&["http://o.com/a.png"], "ic", &[]);
        assert_ne!(
            base,
            Fingerprint::compute(&["http://o.com/b.png"], "ic", &[])
        );
        assert_ne!(
            base,
            Fingerprint::compute(&["http://o.com/a.png"], "ce", &[])
        );
        assert_ne!(
            base,
            Fingerprint::compute(&["http://o.com/a.png"], "ic", &["mobile"])
        );
    }

    #[test]
    fn fingerprint_input_boundaries_are_unambiguous() {
        // Two inputs "ab","c" must differ from "a","bc".
        let a = Fingerprint::compute(&["ab", "c"], "ic", &[]);
        let b = Fingerprint::compute(&["a", "bc"], "ic", &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn content_digest_truncation() {
        let d = ContentDigest::compute(b"bytes", 10);
        assert_eq!(d.as_str().len(), 10);
        let long = ContentDigest::compute(b"bytes", 43);
        assert!(long.as_str().starts_with(d.as_str()));
    }

    #[test]
    fn short_keys_pass_through() {
        assert_eq!(cache_key("abc"), "abc");
    }

    #[test]
    fn long_keys_are_digested() {
        let long = "x".repeat(300);
        let key = cache_key(&long);
        assert!(key.starts_with('#'));
        assert!(key.len() <= 64);
        assert_eq!(key, cache_key(&long));
    }
}
