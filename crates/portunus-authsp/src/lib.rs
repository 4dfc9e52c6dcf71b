//! Portunus AuthSP Handshake
//!
//! Pluggable credential-verification backends ("AuthSPs") and the signed,
//! retry-limited handshake that drives them.
//!
//! # Modules
//!
//! - [`backend`] - The backend contract
//! - [`backends`] - Password, LDAP, SMS and HTTP delegate backends
//! - [`descriptor`] - AuthSP configuration
//! - [`registry`] - Startup resolution of descriptors into backends
//! - [`handshake`] - The per-session state machine

pub mod backend;
pub mod backends;
pub mod descriptor;
pub mod error;
pub mod handshake;
pub mod registry;

pub use backend::{
    AuthspBackend, BackendVerdict, RequestFields, VerifyRequest, PASSWORD_FIELD, RESPONSE_FIELD,
};
pub use descriptor::{AuthspDescriptor, FailureHandling, DEFAULT_ALLOWED_RETRIES};
pub use error::{AuthspError, AuthspResult, BackendError};
pub use handshake::{CredentialPrompt, Handshake, HandshakeStep, Prepared, Submission};
pub use registry::{AuthspRegistry, BackendConfig, RegisteredAuthsp};
