//! Error types for AuthSP backends and the handshake.

use portunus_core::ResultCode;
use portunus_envelope::EnvelopeError;
use thiserror::Error;

/// Failure of a backend call that is not a credential verdict.
///
/// A wrong password is never an error; it is [`BackendVerdict::Fail`].
///
/// [`BackendVerdict::Fail`]: crate::backend::BackendVerdict::Fail
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Network error, timeout or server-side failure.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with something it should not have.
    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    /// The backend is not usable with the given request or settings.
    #[error("Backend misconfigured: {0}")]
    Configuration(String),
}

impl BackendError {
    /// Whether the endpoint should be reported to the resource selector.
    #[must_use]
    pub fn is_endpoint_failure(&self) -> bool {
        matches!(
            self,
            BackendError::Unavailable(_) | BackendError::InvalidResponse(_)
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum AuthspError {
    #[error("Unknown AuthSP: {0}")]
    UnknownAuthsp(String),

    /// Tampered or replayed form, or a handle that does not belong to the
    /// current challenge.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No configured AuthSP satisfies the required level.
    #[error("No AuthSP for level {0}")]
    LevelNotAvailable(u32),

    #[error("AuthSP configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

impl AuthspError {
    #[must_use]
    pub fn result_code(&self) -> ResultCode {
        match self {
            AuthspError::UnknownAuthsp(_) => ResultCode::UnknownAuthsp,
            AuthspError::InvalidRequest(_) => ResultCode::InvalidRequest,
            AuthspError::LevelNotAvailable(_) => ResultCode::LevelNotAvailable,
            AuthspError::Backend(e) if e.is_endpoint_failure() => ResultCode::BackendUnavailable,
            AuthspError::Backend(_)
            | AuthspError::Configuration(_)
            | AuthspError::Envelope(_) => ResultCode::InternalError,
        }
    }
}

pub type AuthspResult<T> = Result<T, AuthspError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_codes() {
        assert_eq!(
            AuthspError::InvalidRequest("x".to_string()).result_code(),
            ResultCode::InvalidRequest
        );
        assert_eq!(
            AuthspError::from(BackendError::Unavailable("timeout".to_string())).result_code(),
            ResultCode::BackendUnavailable
        );
        assert_eq!(
            AuthspError::from(BackendError::Configuration("no url".to_string())).result_code(),
            ResultCode::InternalError
        );
    }
}
