//! Content-addressed URL naming.
//!
//! Optimized artifacts are served under a leaf name that encodes the
//! filter that produced them, a truncated digest of the optimized
//! bytes, the original leaf name, and the output extension:
//!
//! ```text
//! <name>.pagespeed.<id>.<hash>.<ext>
//! ```
//!
//! The encoding is fully reversible for anything `encode` can produce,
//! and case-sensitive throughout. The hash field may be empty while an
//! artifact is still being built.

use crate::content_type::ContentType;
use crate::error::TypesError;
use crate::Result;
use std::fmt;

/// The literal marker separating the original leaf from the encoded
/// fields.
const MARKER: &str = "pagespeed";

/// Decomposed form of a content-addressed leaf name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNamer {
    /// Short filter identifier, 2-3 lowercase ASCII letters.
    pub id: String,
    /// Original leaf name (the last path segment of the input URL).
    pub name: String,
    /// Truncated base64url digest of the optimized bytes. Empty while
    /// the artifact is under construction.
    pub hash: String,
    /// Lowercase canonical extension from the content-type table.
    pub ext: String,
}

impl ResourceNamer {
    /// Characters of overhead the encoding adds beyond the field
    /// contents: `.pagespeed.` plus the two inner dots.
    pub const OVERHEAD: usize = MARKER.len() + 4;

    /// Creates a namer, validating the id and extension.
    pub fn new(id: &str, name: &str, hash: &str, ext: &str) -> Result<Self> {
        if id.is_empty() || id.contains('.') {
            return Err(TypesError::InvalidFilterId(id.to_string()));
        }
        if ContentType::from_extension(ext).is_none() {
            return Err(TypesError::UnknownExtension(ext.to_string()));
        }
        Ok(Self {
            id: id.to_string(),
            name: name.to_string(),
            hash: hash.to_string(),
            ext: ext.to_string(),
        })
    }

    /// Formats the content-addressed leaf.
    pub fn encode(&self) -> String {
        format!(
            "{}.{}.{}.{}.{}",
            self.name, MARKER, self.id, self.hash, self.ext
        )
    }

    /// Length the encoded leaf will have, usable before the hash is
    /// known by supplying the configured hash length.
    pub fn encoded_len(&self, hash_len: usize) -> usize {
        self.name.len() + Self::OVERHEAD + self.id.len() + hash_len + self.ext.len()
    }

    /// Parses a content-addressed leaf back into its fields.
    ///
    /// Returns `None` unless the leaf carries the `pagespeed` marker
    /// followed by exactly three dot-separated fields. Inverse of
    /// [`encode`](Self::encode) for any leaf `encode` could produce.
    pub fn decode(leaf: &str) -> Option<ResourceNamer> {
        // The name (and, pathologically, the hash) may contain dots or
        // even the marker text itself, so try every marker occurrence
        // and keep the rightmost split that parses cleanly.
        let marker = format!(".{}.", MARKER);
        let mut result = None;
        for (at, _) in leaf.match_indices(&marker) {
            let name = &leaf[..at];
            let tail = &leaf[at + marker.len()..];
            if let Some(parsed) = Self::parse_tail(name, tail) {
                result = Some(parsed);
            }
        }
        result
    }

    fn parse_tail(name: &str, tail: &str) -> Option<ResourceNamer> {
        let mut fields = tail.split('.');
        let id = fields.next()?;
        let hash = fields.next()?;
        let ext = fields.next()?;
        if fields.next().is_some() {
            return None;
        }
        if id.is_empty() || ContentType::from_extension(ext).is_none() {
            return None;
        }
        Some(ResourceNamer {
            id: id.to_string(),
            name: name.to_string(),
            hash: hash.to_string(),
            ext: ext.to_string(),
        })
    }

    /// Content type implied by the output extension.
    pub fn content_type(&self) -> Option<ContentType> {
        ContentType::from_extension(&self.ext)
    }
}

impl fmt::Display for ResourceNamer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}
