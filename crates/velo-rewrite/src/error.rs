//! Rewriting error types.
//!
//! Most of these never surface past the rewrite driver: the universal
//! user-visible failure mode is the absence of a rewrite, with the
//! original URL emitted unchanged.

use thiserror::Error;

/// Errors that can occur while rewriting resources.
#[derive(Debug, Error)]
pub enum RewriteError {
    /// The candidate URL could not be parsed or resolved.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The domain policy refused the rewrite.
    #[error("policy denied: {0}")]
    PolicyDenied(String),

    /// A configuration-time policy rule is malformed.
    #[error("invalid policy rule: {0}")]
    InvalidRule(String),

    /// The origin fetch failed or timed out.
    #[error("fetch failed for {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    /// The origin answered with a non-success status.
    #[error("origin returned {status} for {url}")]
    OriginStatus { url: String, status: u16 },

    /// A rebuild could not finish within its deadline.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// The codec declined to optimize (growth, unsupported input,
    /// content-type mismatch).
    #[error("codec refused: {0}")]
    CodecRefused(String),

    /// A cache operation failed.
    #[error(transparent)]
    Cache(#[from] velo_cache::CacheError),

    /// An identity operation failed.
    #[error(transparent)]
    Types(#[from] velo_types::TypesError),
}
