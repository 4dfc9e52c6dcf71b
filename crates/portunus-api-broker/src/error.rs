//! Broker error types

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use portunus_authsp::AuthspError;
use portunus_core::{AuthLevel, ResultCode};
use portunus_envelope::EnvelopeError;
use portunus_resources::ResourceError;
use portunus_store::StoreError;
use thiserror::Error;

use crate::models::forms::error_page;

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Broker errors. Every variant maps to exactly one wire result code.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The application id is not registered
    #[error("Unknown application: {0}")]
    UnknownApp(String),

    /// The organization or peer authority is not registered
    #[error("Unknown organization: {0}")]
    UnknownOrganization(String),

    /// Missing or malformed request fields
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A mandatory signature was absent or did not verify
    #[error("Invalid signature from {0}")]
    InvalidSignature(String),

    /// Session lookup or write failed
    #[error("Session error: {0}")]
    Session(StoreError),

    /// Ticket lookup or write failed
    #[error("Ticket error: {0}")]
    Ticket(StoreError),

    /// A ticket reference or peer response is structurally invalid
    #[error("Ticket not valid: {0}")]
    TgtNotValid(String),

    /// Nothing can authenticate at the required level
    #[error("No authentication method for level {0}")]
    LevelNotAvailable(AuthLevel),

    #[error(transparent)]
    Authsp(#[from] AuthspError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// A peer back-channel call failed
    #[error("Back-channel call failed: {0}")]
    Backchannel(String),

    /// The attempt ended without an authenticated user
    #[error("Authentication ended with result {0}")]
    Denied(ResultCode),

    /// Registry contents are inconsistent
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    /// The wire result code for this error.
    #[must_use]
    pub fn result_code(&self) -> ResultCode {
        match self {
            BrokerError::UnknownApp(_) => ResultCode::UnknownApp,
            BrokerError::UnknownOrganization(_) => ResultCode::UnknownOrganization,
            BrokerError::InvalidRequest(_) | BrokerError::InvalidSignature(_) => {
                ResultCode::InvalidRequest
            }
            BrokerError::Session(e) => e.session_result_code(),
            BrokerError::Ticket(e) => e.ticket_result_code(),
            BrokerError::TgtNotValid(_) => ResultCode::TgtNotValid,
            BrokerError::LevelNotAvailable(_) => ResultCode::LevelNotAvailable,
            BrokerError::Authsp(e) => e.result_code(),
            BrokerError::Resource(ResourceError::NoActiveResource(_))
            | BrokerError::Backchannel(_) => ResultCode::BackendUnavailable,
            BrokerError::Denied(code) => *code,
            BrokerError::Envelope(_)
            | BrokerError::Resource(_)
            | BrokerError::Configuration(_)
            | BrokerError::Internal(_) => ResultCode::InternalError,
        }
    }

    fn status(&self) -> StatusCode {
        match self.result_code() {
            ResultCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            ResultCode::BackendUnavailable => StatusCode::BAD_GATEWAY,
            ResultCode::UnknownApp | ResultCode::UnknownOrganization | ResultCode::UnknownAuthsp => {
                StatusCode::NOT_FOUND
            }
            ResultCode::AuthspAccessDenied | ResultCode::Cancel => StatusCode::FORBIDDEN,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// A message that is safe to show to the browser.
    fn public_message(&self) -> String {
        match self {
            BrokerError::Envelope(e) => {
                tracing::error!("Broker envelope error: {}", e);
                "An internal error occurred".to_string()
            }
            BrokerError::Configuration(msg) | BrokerError::Internal(msg) => {
                tracing::error!("Broker internal error: {}", msg);
                "An internal error occurred".to_string()
            }
            BrokerError::Session(StoreError::Storage(msg))
            | BrokerError::Ticket(StoreError::Storage(msg)) => {
                tracing::error!("Broker storage error: {}", msg);
                "A storage error occurred".to_string()
            }
            BrokerError::Session(_) => "Your login session has expired".to_string(),
            BrokerError::Backchannel(_) | BrokerError::Resource(_) => {
                "The authentication service is temporarily unavailable".to_string()
            }
            BrokerError::InvalidSignature(_) => "Signature verification failed".to_string(),
            BrokerError::Denied(ResultCode::Cancel) => "Authentication cancelled".to_string(),
            BrokerError::Denied(_) => "Authentication failed".to_string(),
            BrokerError::Authsp(AuthspError::Backend(_)) => {
                "The authentication service is temporarily unavailable".to_string()
            }
            BrokerError::Authsp(AuthspError::InvalidRequest(_))
            | BrokerError::InvalidRequest(_) => "Invalid request".to_string(),
            BrokerError::UnknownApp(_)
            | BrokerError::UnknownOrganization(_)
            | BrokerError::Ticket(_)
            | BrokerError::TgtNotValid(_)
            | BrokerError::LevelNotAvailable(_)
            | BrokerError::Authsp(_) => self.to_string(),
        }
    }
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let html = error_page(self.result_code(), &self.public_message());
        (status, Html(html)).into_response()
    }
}
