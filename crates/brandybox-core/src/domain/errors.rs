//! Domain error types
//!
//! Validation failures raised while constructing domain values.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid relative path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid hash format (expected lowercase hex SHA-256)
    #[error("Invalid hash format: {0}")]
    InvalidHash(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
