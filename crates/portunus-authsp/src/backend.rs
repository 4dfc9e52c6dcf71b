//! The contract every credential-verification backend implements.

use async_trait::async_trait;
use portunus_core::{AttributeBag, AuthspId};
use portunus_resources::Resource;
use std::collections::BTreeMap;

use crate::error::BackendError;

/// Flat key/value credential submission.
pub type RequestFields = BTreeMap<String, String>;

/// Form field carrying the user's answer to a challenge.
pub const RESPONSE_FIELD: &str = "response";

/// Form field carrying the password.
pub const PASSWORD_FIELD: &str = "password";

/// One verification call.
#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub authsp: AuthspId,
    /// Subject being authenticated. A forced uid has already been applied.
    pub uid: String,
    pub fields: RequestFields,
    /// Handle returned by a previous `Challenge` verdict.
    pub sub_session: Option<String>,
    /// Active endpoint of the AuthSP's resource group, if it has one.
    pub resource: Option<Resource>,
}

impl VerifyRequest {
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// The selected endpoint, or a configuration error for backends that
    /// cannot work without one.
    pub fn require_resource(&self) -> Result<&Resource, BackendError> {
        self.resource.as_ref().ok_or_else(|| {
            BackendError::Configuration(format!("AuthSP {} has no resource", self.authsp))
        })
    }
}

/// Outcome of a verification call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendVerdict {
    /// Verified; the bag holds attributes released by the backend.
    Success(AttributeBag),
    /// Verified without any attributes.
    SuccessNoContent,
    /// Another round is needed.
    Challenge { sub_session: String, prompt: String },
    /// Credentials rejected.
    Fail,
}

/// A credential-verification backend.
#[async_trait]
pub trait AuthspBackend: Send + Sync {
    /// Short backend kind name for logging.
    fn kind(&self) -> &'static str;

    async fn verify(&self, request: &VerifyRequest) -> Result<BackendVerdict, BackendError>;
}
