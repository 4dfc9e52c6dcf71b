//! Inbound request types

use portunus_authsp::{RequestFields, Submission};
use portunus_core::AuthspId;
use serde::Deserialize;
use std::collections::BTreeMap;

/// `GET /login`
#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    pub rid: String,
}

/// `POST /login/authsp`
#[derive(Debug, Deserialize)]
pub struct AuthspChoiceForm {
    pub rid: String,
    #[serde(default)]
    pub authsp: Option<String>,
    /// Present when the user pressed cancel.
    #[serde(default)]
    pub cancel: Option<String>,
}

/// `POST /login/organization`
#[derive(Debug, Deserialize)]
pub struct OrganizationChoiceForm {
    pub rid: String,
    pub organization: String,
}

/// `POST /login/credentials`
///
/// Every field that is not part of the handshake envelope is collected into
/// `fields` and handed to the backend.
#[derive(Debug, Deserialize)]
pub struct CredentialsForm {
    pub rid: String,
    pub authsp: String,
    pub retry_counter: String,
    pub signature: String,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub sub_session: Option<String>,
    #[serde(default)]
    pub cancel: Option<String>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

impl CredentialsForm {
    #[must_use]
    pub fn is_cancel(&self) -> bool {
        self.cancel.is_some()
    }

    /// Converts the form into a handshake submission.
    #[must_use]
    pub fn into_submission(self) -> Submission {
        let fields: RequestFields = self.fields;
        Submission {
            authsp: Some(AuthspId::new(self.authsp)),
            retry_counter: self.retry_counter,
            signature: self.signature,
            uid: self.uid,
            sub_session: self.sub_session,
            fields,
        }
    }
}

/// `GET /cross/login`, sent by a delegating broker through the browser.
#[derive(Debug, Deserialize)]
pub struct CrossLoginQuery {
    #[serde(rename = "a-select-server")]
    pub server: String,
    pub local_rid: String,
    pub as_url: String,
    pub required_level: String,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

/// `GET /cross/return`, sent by a peer broker through the browser.
#[derive(Debug, Deserialize)]
pub struct CrossReturnQuery {
    #[serde(rename = "a-select-server")]
    pub server: String,
    pub rid: String,
    pub local_rid: String,
    pub aselect_credentials: String,
    #[serde(default)]
    pub signature: Option<String>,
}

/// `POST /api`: one flat form shared by every back-channel request.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ApiForm {
    pub request: String,
    #[serde(rename = "a-select-server")]
    pub server: Option<String>,
    pub rid: Option<String>,
    pub app_id: Option<String>,
    pub app_url: Option<String>,
    pub forced_logon: Option<String>,
    pub uid: Option<String>,
    pub country: Option<String>,
    pub language: Option<String>,
    pub remote_organization: Option<String>,
    pub aselect_credentials: Option<String>,
    pub signature: Option<String>,
}

impl ApiForm {
    /// Returns a present, non-blank field or an error naming it.
    pub fn required<'a>(
        value: &'a Option<String>,
        name: &str,
    ) -> crate::BrokerResult<&'a str> {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| crate::BrokerError::InvalidRequest(format!("missing {name}")))
    }
}
