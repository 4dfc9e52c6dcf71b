//! Outbound response types

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
};
use portunus_core::ResultCode;
use serde::Serialize;

/// A form-encoded back-channel reply. Fields keep their insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiReply {
    fields: Vec<(String, String)>,
}

impl ApiReply {
    #[must_use]
    pub fn new(code: ResultCode) -> Self {
        Self {
            fields: vec![("result_code".to_string(), code.as_str().to_string())],
        }
    }

    #[must_use]
    pub fn field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields.push((key.to_string(), value.into()));
        self
    }

    /// Adds the field only when a non-empty value is present.
    #[must_use]
    pub fn optional(self, key: &str, value: Option<&str>) -> Self {
        match value.filter(|v| !v.is_empty()) {
            Some(value) => self.field(key, value),
            None => self,
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn result_code(&self) -> Option<ResultCode> {
        self.get("result_code").and_then(|code| code.parse().ok())
    }

    /// Form-encodes the reply.
    pub fn encode(&self) -> Result<String, serde_urlencoded::ser::Error> {
        serde_urlencoded::to_string(&self.fields)
    }
}

impl IntoResponse for ApiReply {
    fn into_response(self) -> Response {
        let body = match self.encode() {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode API reply");
                format!("result_code={}", ResultCode::InternalError.as_str())
            }
        };
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/x-www-form-urlencoded")],
            body,
        )
            .into_response()
    }
}

/// Browser-facing outcome of a login step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserResponse {
    /// An HTML page (form, auto-submit form or message).
    Page { html: String, cookie: Option<String> },
    /// A `302 Found` redirect.
    Redirect {
        location: String,
        cookie: Option<String>,
    },
}

impl BrowserResponse {
    #[must_use]
    pub fn page(html: String) -> Self {
        BrowserResponse::Page { html, cookie: None }
    }

    #[must_use]
    pub fn redirect(location: String) -> Self {
        BrowserResponse::Redirect {
            location,
            cookie: None,
        }
    }

    /// Attaches a `Set-Cookie` value.
    #[must_use]
    pub fn with_cookie(self, value: String) -> Self {
        match self {
            BrowserResponse::Page { html, .. } => BrowserResponse::Page {
                html,
                cookie: Some(value),
            },
            BrowserResponse::Redirect { location, .. } => BrowserResponse::Redirect {
                location,
                cookie: Some(value),
            },
        }
    }
}

impl IntoResponse for BrowserResponse {
    fn into_response(self) -> Response {
        let (mut response, cookie) = match self {
            BrowserResponse::Page { html, cookie } => (Html(html).into_response(), cookie),
            BrowserResponse::Redirect { location, cookie } => {
                let response = match HeaderValue::from_str(&location) {
                    Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
                    Err(_) => {
                        tracing::error!("Redirect location is not a valid header value");
                        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                    }
                };
                (response, cookie)
            }
        };

        if let Some(cookie) = cookie {
            match HeaderValue::from_str(&cookie) {
                Ok(value) => {
                    response.headers_mut().insert(header::SET_COOKIE, value);
                }
                Err(_) => tracing::warn!("Dropping cookie that is not a valid header value"),
            }
        }
        response
    }
}

/// `GET /health`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub server_id: String,
    pub sessions: usize,
    pub tickets: usize,
}
