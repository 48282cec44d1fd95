//! Identity error types.

use thiserror::Error;

/// Errors that can occur while forming resource identities.
#[derive(Debug, Error)]
pub enum TypesError {
    /// The filter id is empty or contains a separator character.
    #[error("invalid filter id: {0:?}")]
    InvalidFilterId(String),

    /// The extension is not in the closed content-type table.
    #[error("unknown extension: {0:?}")]
    UnknownExtension(String),

    /// A configured option is out of its permitted range.
    #[error("invalid option {name}: {reason}")]
    InvalidOption {
        /// Option name as it appears in configuration.
        name: &'static str,
        /// Human-readable constraint violation.
        reason: String,
    },
}
