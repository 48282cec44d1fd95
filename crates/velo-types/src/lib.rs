//! Resource identity for Velo.
//!
//! This crate provides the shared vocabulary of the rewriting engine:
//! the closed content-type table, the content-addressed URL namer,
//! deterministic fingerprints, and the rewrite option set.

mod content_type;
mod error;
mod fingerprint;
mod namer;
mod options;

pub use content_type::ContentType;
pub use error::TypesError;
pub use fingerprint::{cache_key, ContentDigest, Fingerprint};
pub use namer::ResourceNamer;
pub use options::RewriteOptions;

/// Result type for identity operations.
pub type Result<T> = std::result::Result<T, TypesError>;
