//! Error Types
//!
//! Errors raised while parsing the shared value types.

use thiserror::Error;

/// Errors from the core value types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    /// An authentication level was not a non-negative integer.
    #[error("Invalid authentication level: {0}")]
    InvalidLevel(String),

    /// A serialized attribute bag could not be decoded.
    #[error("Invalid attributes: {0}")]
    InvalidAttributes(String),
}

/// Type alias for Results using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;
