//! AuthSP descriptors as read from the registry document.

use portunus_core::{AuthLevel, AuthspId};
use serde::Deserialize;

use crate::registry::BackendConfig;

/// Default number of re-prompts after a failed submission.
pub const DEFAULT_ALLOWED_RETRIES: u32 = 3;

/// Who renders an error once an attempt has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailureHandling {
    /// The broker shows an error page with the result code.
    #[default]
    Aselect,
    /// The broker issues an error ticket and sends the browser back to the
    /// requester, which learns the code through `verify_credentials`.
    Local,
}

fn default_allowed_retries() -> u32 {
    DEFAULT_ALLOWED_RETRIES
}

/// Read-only description of one AuthSP.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthspDescriptor {
    pub id: AuthspId,
    pub friendly_name: String,
    pub level: AuthLevel,
    #[serde(default)]
    pub resource_group: Option<String>,
    /// Credential keys that must be present and non-blank on submission.
    #[serde(default)]
    pub required_keys: Vec<String>,
    #[serde(default = "default_allowed_retries")]
    pub allowed_retries: u32,
    #[serde(default)]
    pub failure_handling: FailureHandling,
    #[serde(default)]
    pub next_authsp: Option<AuthspId>,
    /// Render the combined username/password form for this AuthSP.
    #[serde(default)]
    pub direct: bool,
    pub backend: BackendConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_defaults() {
        let json = r#"{
            "id": "password",
            "friendly_name": "Password",
            "level": 10,
            "backend": {"kind": "password", "users": []}
        }"#;
        let descriptor: AuthspDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.allowed_retries, DEFAULT_ALLOWED_RETRIES);
        assert_eq!(descriptor.failure_handling, FailureHandling::Aselect);
        assert!(!descriptor.direct);
        assert!(descriptor.next_authsp.is_none());
    }

    #[test]
    fn test_failure_handling_local() {
        let handling: FailureHandling = serde_json::from_str(r#""local""#).unwrap();
        assert_eq!(handling, FailureHandling::Local);
    }
}
