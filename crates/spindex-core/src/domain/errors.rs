//! Domain error types
//!
//! Validation failures raised while building domain values from remote or
//! persisted data.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid delta link
    #[error("Invalid delta link: {0}")]
    InvalidDeltaLink(String),

    /// Principal identifiers must not be blank
    #[error("Invalid principal: {0}")]
    InvalidPrincipal(String),

    /// A remote payload was missing a field the node kind requires
    #[error("Missing field '{field}' on {kind}")]
    MissingField {
        /// Node kind being built
        kind: String,
        /// Field name in the remote payload
        field: String,
    },

    /// The persisted cursor blob could not be decoded
    #[error("Invalid sync cursor: {0}")]
    InvalidCursor(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
