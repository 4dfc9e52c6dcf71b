//! Delegates verification to an external HTTP service.
//!
//! The request is POSTed as JSON to the active resource of the AuthSP's
//! group. Status mapping:
//!
//! - `200` with a JSON verdict body
//! - `204` success without attributes
//! - `401`/`403` credentials rejected
//! - anything else, or a transport error, is an unavailable backend

use async_trait::async_trait;
use portunus_core::AttributeBag;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::backend::{AuthspBackend, BackendVerdict, RequestFields, VerifyRequest};
use crate::error::BackendError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpDelegateSettings {
    /// Path appended to the resource URL.
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Serialize)]
struct DelegateRequest<'a> {
    authsp: &'a str,
    uid: &'a str,
    fields: &'a RequestFields,
    #[serde(skip_serializing_if = "Option::is_none")]
    sub_session: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum DelegateResult {
    Success,
    Challenge,
    Fail,
}

#[derive(Debug, Deserialize)]
struct DelegateResponse {
    result: DelegateResult,
    #[serde(default)]
    attributes: AttributeBag,
    #[serde(default)]
    sub_session: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpDelegateBackend {
    settings: HttpDelegateSettings,
    client: reqwest::Client,
}

impl HttpDelegateBackend {
    #[must_use]
    pub fn new(settings: HttpDelegateSettings, client: reqwest::Client) -> Self {
        Self { settings, client }
    }

    fn endpoint(&self, base: &str) -> String {
        if self.settings.path.is_empty() {
            return base.to_string();
        }
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            self.settings.path.trim_start_matches('/')
        )
    }

    fn interpret(body: DelegateResponse) -> Result<BackendVerdict, BackendError> {
        match body.result {
            DelegateResult::Success if body.attributes.is_empty() => {
                Ok(BackendVerdict::SuccessNoContent)
            }
            DelegateResult::Success => Ok(BackendVerdict::Success(body.attributes)),
            DelegateResult::Fail => Ok(BackendVerdict::Fail),
            DelegateResult::Challenge => {
                let sub_session = body.sub_session.filter(|h| !h.is_empty()).ok_or_else(|| {
                    BackendError::InvalidResponse("challenge without sub_session".to_string())
                })?;
                Ok(BackendVerdict::Challenge {
                    sub_session,
                    prompt: body.prompt.unwrap_or_default(),
                })
            }
        }
    }
}

#[async_trait]
impl AuthspBackend for HttpDelegateBackend {
    fn kind(&self) -> &'static str {
        "http_delegate"
    }

    #[instrument(skip(self, request), fields(authsp = %request.authsp))]
    async fn verify(&self, request: &VerifyRequest) -> Result<BackendVerdict, BackendError> {
        let resource = request.require_resource()?;
        let url = self.endpoint(&resource.url);

        let body = DelegateRequest {
            authsp: request.authsp.as_str(),
            uid: &request.uid,
            fields: &request.fields,
            sub_session: request.sub_session.as_deref(),
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(format!("HTTP delegate: {e}")))?;

        let status = response.status();
        debug!(status = %status, "HTTP delegate answered");
        match status {
            StatusCode::OK => {
                let body: DelegateResponse = response
                    .json()
                    .await
                    .map_err(|e| BackendError::InvalidResponse(format!("JSON parse error: {e}")))?;
                Self::interpret(body)
            }
            StatusCode::NO_CONTENT => Ok(BackendVerdict::SuccessNoContent),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(BackendVerdict::Fail),
            other => Err(BackendError::Unavailable(format!("HTTP status {other}"))),
        }
    }
}
