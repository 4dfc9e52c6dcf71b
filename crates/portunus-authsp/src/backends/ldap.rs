//! Directory bind backend.
//!
//! Authenticates by binding as the user. The user's DN is either built from
//! a template or found with a search under a service account.

use async_trait::async_trait;
use ldap3::{dn_escape, ldap_escape, Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use portunus_core::AttributeBag;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::backend::{AuthspBackend, BackendVerdict, VerifyRequest, PASSWORD_FIELD};
use crate::error::BackendError;

/// LDAP result code for invalid credentials.
const LDAP_INVALID_CREDENTIALS: u32 = 49;

fn default_user_attribute() -> String {
    "uid".to_string()
}

/// Settings of an LDAP AuthSP. The server URL comes from the resource group.
#[derive(Debug, Clone, Deserialize)]
pub struct LdapSettings {
    pub base_dn: String,
    #[serde(default = "default_user_attribute")]
    pub user_attribute: String,
    /// Service account used to search for the user's DN.
    #[serde(default)]
    pub search_bind_dn: Option<String>,
    #[serde(default)]
    pub search_bind_password: Option<String>,
    /// Attributes released on success.
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub starttls: bool,
}

#[derive(Debug, Clone)]
pub struct LdapBackend {
    settings: LdapSettings,
    timeout: Duration,
}

impl LdapBackend {
    #[must_use]
    pub fn new(settings: LdapSettings, timeout: Duration) -> Self {
        Self { settings, timeout }
    }

    /// DN for `uid` when no service account is configured.
    #[must_use]
    pub fn template_dn(&self, uid: &str) -> String {
        format!(
            "{}={},{}",
            self.settings.user_attribute,
            dn_escape(uid),
            self.settings.base_dn
        )
    }

    /// Search filter for `uid`.
    #[must_use]
    pub fn user_filter(&self, uid: &str) -> String {
        format!("({}={})", self.settings.user_attribute, ldap_escape(uid))
    }

    async fn connect(&self, url: &str) -> Result<Ldap, BackendError> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(self.timeout)
            .set_starttls(self.settings.starttls);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, url)
            .await
            .map_err(|e| BackendError::Unavailable(format!("LDAP connect to {url}: {e}")))?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });
        Ok(ldap)
    }

    async fn find_dn(&self, ldap: &mut Ldap, uid: &str) -> Result<Option<String>, BackendError> {
        let (Some(bind_dn), Some(bind_password)) = (
            self.settings.search_bind_dn.as_deref(),
            self.settings.search_bind_password.as_deref(),
        ) else {
            return Ok(Some(self.template_dn(uid)));
        };

        ldap.simple_bind(bind_dn, bind_password)
            .await
            .and_then(|r| r.success())
            .map_err(|e| BackendError::Unavailable(format!("Service bind failed: {e}")))?;

        let (entries, _) = ldap
            .search(
                &self.settings.base_dn,
                Scope::Subtree,
                &self.user_filter(uid),
                vec!["dn"],
            )
            .await
            .and_then(|r| r.success())
            .map_err(|e| BackendError::Unavailable(format!("User search failed: {e}")))?;

        Ok(entries
            .into_iter()
            .next()
            .map(|entry| SearchEntry::construct(entry).dn))
    }

    async fn read_attributes(
        &self,
        ldap: &mut Ldap,
        dn: &str,
    ) -> Result<AttributeBag, BackendError> {
        let mut bag = AttributeBag::new();
        if self.settings.attributes.is_empty() {
            return Ok(bag);
        }

        let wanted: Vec<&str> = self.settings.attributes.iter().map(String::as_str).collect();
        let (entries, _) = ldap
            .search(dn, Scope::Base, "(objectClass=*)", wanted)
            .await
            .and_then(|r| r.success())
            .map_err(|e| BackendError::InvalidResponse(format!("Attribute read failed: {e}")))?;

        if let Some(entry) = entries.into_iter().next().map(SearchEntry::construct) {
            for (name, values) in entry.attrs {
                for value in values {
                    bag.insert(name.clone(), value);
                }
            }
        }
        Ok(bag)
    }
}

#[async_trait]
impl AuthspBackend for LdapBackend {
    fn kind(&self) -> &'static str {
        "ldap"
    }

    #[instrument(skip(self, request), fields(authsp = %request.authsp))]
    async fn verify(&self, request: &VerifyRequest) -> Result<BackendVerdict, BackendError> {
        let password = request.field(PASSWORD_FIELD).unwrap_or_default();
        // An empty password would be an anonymous bind.
        if password.is_empty() || request.uid.is_empty() {
            return Ok(BackendVerdict::Fail);
        }

        let resource = request.require_resource()?;
        let mut ldap = self.connect(&resource.url).await?;

        let Some(dn) = self.find_dn(&mut ldap, &request.uid).await? else {
            debug!("User not found in directory");
            let _ = ldap.unbind().await;
            return Ok(BackendVerdict::Fail);
        };

        let bind = ldap
            .simple_bind(&dn, password)
            .await
            .map_err(|e| BackendError::Unavailable(format!("User bind failed: {e}")))?;

        let verdict = match bind.rc {
            0 => {
                let attributes = self.read_attributes(&mut ldap, &dn).await?;
                if attributes.is_empty() {
                    BackendVerdict::SuccessNoContent
                } else {
                    BackendVerdict::Success(attributes)
                }
            }
            LDAP_INVALID_CREDENTIALS => BackendVerdict::Fail,
            rc => {
                let _ = ldap.unbind().await;
                return Err(BackendError::InvalidResponse(format!(
                    "LDAP bind returned {rc}: {}",
                    bind.text
                )));
            }
        };

        if let Err(e) = ldap.unbind().await {
            warn!(error = %e, "Error during LDAP unbind");
        }
        Ok(verdict)
    }
}
