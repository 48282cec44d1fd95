//! Cache error types.

use thiserror::Error;

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// An I/O error occurred in a backing store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value failed structural validation.
    #[error("corrupt value: {0}")]
    CorruptValue(String),

    /// An operation was called in an invalid value state, for example
    /// a second `set_headers` without an intervening `clear`.
    #[error("invalid value state: {0}")]
    InvalidState(&'static str),
}
