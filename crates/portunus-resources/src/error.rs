//! Error types for resource selection.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResourceError {
    /// No resource group with this name is configured.
    #[error("Unknown resource group: {0}")]
    UnknownGroup(String),

    /// Every resource of the group failed its availability probe.
    #[error("No active resource in group: {0}")]
    NoActiveResource(String),

    /// A resource URL could not be probed.
    #[error("Invalid resource URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },
}

pub type ResourceResult<T> = Result<T, ResourceError>;
