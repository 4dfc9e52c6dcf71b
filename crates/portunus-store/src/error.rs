//! Store error types.

use portunus_core::ResultCode;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// No entry under this key.
    #[error("Entry not found: {0}")]
    NotFound(String),

    /// The entry existed but its lifetime is over. It has been removed.
    #[error("Entry expired: {0}")]
    Expired(String),

    /// Another writer updated the entry since it was read.
    #[error("Version conflict on {key}: expected {expected}, found {actual}")]
    Conflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    /// A new entry collided with an existing key.
    #[error("Duplicate key: {0}")]
    Duplicate(String),

    /// `modify` gave up after repeated conflicts.
    #[error("Too much contention on {0}")]
    Contended(String),

    /// Backend storage failure.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl StoreError {
    /// Maps a session lookup failure to its wire result code.
    #[must_use]
    pub fn session_result_code(&self) -> ResultCode {
        match self {
            StoreError::NotFound(_) | StoreError::Expired(_) => ResultCode::SessionExpired,
            _ => ResultCode::InternalError,
        }
    }

    /// Maps a ticket lookup failure to its wire result code.
    #[must_use]
    pub fn ticket_result_code(&self) -> ResultCode {
        match self {
            StoreError::NotFound(_) => ResultCode::UnknownTgt,
            StoreError::Expired(_) => ResultCode::TgtExpired,
            _ => ResultCode::InternalError,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
