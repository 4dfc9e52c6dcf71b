//! Error types for envelope operations.

use thiserror::Error;

/// Envelope error types.
///
/// Verification never produces an error: an unknown authority or a bad
/// signature is reported as `false` by the verifier.
#[derive(Debug, Clone, Error)]
pub enum EnvelopeError {
    /// Key material could not be parsed or has the wrong size.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The configured algorithm does not match the supplied key.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Producing a signature failed.
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// Sealing a payload failed.
    #[error("Sealing failed: {0}")]
    SealingFailed(String),

    /// The sealed value was malformed, tampered with, or sealed by another key.
    #[error("Opening sealed value failed: {0}")]
    OpenFailed(String),
}

impl EnvelopeError {
    /// Check if this error came from key configuration rather than a request.
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            EnvelopeError::InvalidKey(_) | EnvelopeError::UnsupportedAlgorithm(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EnvelopeError::OpenFailed("too short".to_string());
        assert_eq!(err.to_string(), "Opening sealed value failed: too short");
    }

    #[test]
    fn test_is_configuration_error() {
        assert!(EnvelopeError::InvalidKey("x".to_string()).is_configuration_error());
        assert!(!EnvelopeError::SigningFailed("x".to_string()).is_configuration_error());
    }
}
