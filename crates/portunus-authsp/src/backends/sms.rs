//! One-time code by SMS.
//!
//! First round: a code is generated, sent through the HTTP gateway of the
//! resource group and a `Challenge` is returned. Second round: the submitted
//! `response` is compared against the pending code.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use dashmap::DashMap;
use rand::{Rng, RngCore};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use tracing::{debug, info, instrument};

use crate::backend::{AuthspBackend, BackendVerdict, VerifyRequest, RESPONSE_FIELD};
use crate::error::BackendError;

fn default_code_length() -> usize {
    6
}

fn default_code_ttl_secs() -> u64 {
    300
}

fn default_message() -> String {
    "Your login code is {code}".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmsSettings {
    /// Phone number per uid.
    pub recipients: HashMap<String, String>,
    #[serde(default = "default_code_length")]
    pub code_length: usize,
    #[serde(default = "default_code_ttl_secs")]
    pub code_ttl_secs: u64,
    /// Message template; `{code}` is replaced by the code.
    #[serde(default = "default_message")]
    pub message: String,
}

#[derive(Debug, Clone)]
struct PendingCode {
    uid: String,
    code: String,
    sent_at: Instant,
}

#[derive(Debug, Clone)]
pub struct SmsBackend {
    settings: SmsSettings,
    client: reqwest::Client,
    pending: Arc<DashMap<String, PendingCode>>,
}

impl SmsBackend {
    pub fn new(settings: SmsSettings, client: reqwest::Client) -> Result<Self, BackendError> {
        if !(4..=10).contains(&settings.code_length) {
            return Err(BackendError::Configuration(format!(
                "code_length must be between 4 and 10, got {}",
                settings.code_length
            )));
        }
        Ok(Self {
            settings,
            client,
            pending: Arc::new(DashMap::new()),
        })
    }

    fn generate_code(&self) -> String {
        let mut rng = rand::rngs::OsRng;
        (0..self.settings.code_length)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect()
    }

    fn generate_handle() -> String {
        let mut bytes = [0u8; 24];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Sends a fresh code and returns the handle it is pending under.
    async fn send_code(&self, request: &VerifyRequest, phone: &str) -> Result<String, BackendError> {
        let resource = request.require_resource()?;
        let code = self.generate_code();
        let message = self.settings.message.replace("{code}", &code);

        let response = self
            .client
            .post(&resource.url)
            .form(&[("recipient", phone), ("message", message.as_str())])
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(format!("SMS gateway: {e}")))?;

        if !response.status().is_success() {
            return Err(BackendError::Unavailable(format!(
                "SMS gateway returned {}",
                response.status()
            )));
        }

        let handle = Self::generate_handle();
        self.pending.insert(
            handle.clone(),
            PendingCode {
                uid: request.uid.clone(),
                code,
                sent_at: Instant::now(),
            },
        );
        info!(authsp = %request.authsp, "One-time code sent");
        Ok(handle)
    }

    fn check_code(&self, request: &VerifyRequest, handle: &str) -> BackendVerdict {
        let Some((_, pending)) = self.pending.remove(handle) else {
            debug!(authsp = %request.authsp, "No pending code for handle");
            return BackendVerdict::Fail;
        };
        let ttl = Duration::from_secs(self.settings.code_ttl_secs);
        if pending.sent_at.elapsed() > ttl || pending.uid != request.uid {
            return BackendVerdict::Fail;
        }

        let submitted = request.field(RESPONSE_FIELD).unwrap_or_default().trim();
        if bool::from(submitted.as_bytes().ct_eq(pending.code.as_bytes())) {
            BackendVerdict::SuccessNoContent
        } else {
            BackendVerdict::Fail
        }
    }

    fn mask(phone: &str) -> String {
        let visible: String = phone
            .chars()
            .rev()
            .take(2)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("***{visible}")
    }

    /// Drops codes older than their lifetime.
    pub fn cleanup_expired(&self) -> usize {
        let ttl = Duration::from_secs(self.settings.code_ttl_secs);
        let before = self.pending.len();
        self.pending.retain(|_, pending| pending.sent_at.elapsed() <= ttl);
        before.saturating_sub(self.pending.len())
    }
}

#[async_trait]
impl AuthspBackend for SmsBackend {
    fn kind(&self) -> &'static str {
        "sms"
    }

    #[instrument(skip(self, request), fields(authsp = %request.authsp))]
    async fn verify(&self, request: &VerifyRequest) -> Result<BackendVerdict, BackendError> {
        if let Some(handle) = request.sub_session.as_deref() {
            return Ok(self.check_code(request, handle));
        }

        let Some(phone) = self.settings.recipients.get(&request.uid) else {
            debug!("No phone number for user");
            return Ok(BackendVerdict::Fail);
        };

        let handle = self.send_code(request, phone).await?;
        Ok(BackendVerdict::Challenge {
            sub_session: handle,
            prompt: format!("Enter the code sent to {}", Self::mask(phone)),
        })
    }
}
