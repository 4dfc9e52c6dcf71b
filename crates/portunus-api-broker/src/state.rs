//! Shared broker state

use portunus_authsp::{AuthspRegistry, Handshake};
use portunus_core::{AuthorityId, OrganizationId};
use portunus_envelope::TrustEnvelope;
use portunus_resources::ResourceSelector;
use portunus_store::{
    SessionStore, TicketStore, DEFAULT_SESSION_TTL_SECONDS, DEFAULT_TICKET_TTL_SECONDS,
};
use std::sync::Arc;

use crate::services::applications::ApplicationRegistry;
use crate::services::organizations::OrganizationRegistry;
use crate::services::ticket_issuer::TicketIssuer;

/// Runtime settings of one broker instance.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// The `a-select-server` id this broker signs as.
    pub server_id: AuthorityId,
    /// Organization reported for users authenticated here.
    pub organization: OrganizationId,
    /// Externally visible base URL, without trailing slash.
    pub public_url: String,
    pub single_sign_on: bool,
    /// Sign outgoing back-channel requests to peers.
    pub sign_requests: bool,
    pub session_ttl_seconds: i64,
    pub ticket_ttl_seconds: i64,
}

impl BrokerConfig {
    #[must_use]
    pub fn new(
        server_id: AuthorityId,
        organization: OrganizationId,
        public_url: impl Into<String>,
    ) -> Self {
        let public_url: String = public_url.into();
        Self {
            server_id,
            organization,
            public_url: public_url.trim_end_matches('/').to_string(),
            single_sign_on: true,
            sign_requests: true,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            ticket_ttl_seconds: DEFAULT_TICKET_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.public_url, path)
    }

    /// Cookies get the `Secure` flag when the broker is served over TLS.
    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.public_url.starts_with("https://")
    }
}

/// Application state for broker handlers
#[derive(Clone)]
pub struct BrokerState {
    pub config: Arc<BrokerConfig>,
    pub envelope: TrustEnvelope,
    pub handshake: Handshake,
    pub sessions: Arc<dyn SessionStore>,
    pub tickets: Arc<dyn TicketStore>,
    pub issuer: TicketIssuer,
    pub authsps: Arc<AuthspRegistry>,
    pub applications: Arc<ApplicationRegistry>,
    pub organizations: Arc<OrganizationRegistry>,
    pub selector: ResourceSelector,
    /// Back-channel client towards peer brokers. Carries the timeout.
    pub http: reqwest::Client,
}

impl BrokerState {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        config: BrokerConfig,
        envelope: TrustEnvelope,
        sessions: Arc<dyn SessionStore>,
        tickets: Arc<dyn TicketStore>,
        authsps: AuthspRegistry,
        applications: ApplicationRegistry,
        organizations: OrganizationRegistry,
        selector: ResourceSelector,
        http: reqwest::Client,
    ) -> Self {
        let handshake = Handshake::new(envelope.clone(), config.organization.clone());
        let issuer = TicketIssuer::new(
            tickets.clone(),
            envelope.clone(),
            config.ticket_ttl_seconds,
            config.single_sign_on,
            config.secure_cookies(),
        );
        Self {
            config: Arc::new(config),
            envelope,
            handshake,
            sessions,
            tickets,
            issuer,
            authsps: Arc::new(authsps),
            applications: Arc::new(applications),
            organizations: Arc::new(organizations),
            selector,
            http,
        }
    }

    /// Removes expired sessions, tickets and pending one-time codes.
    pub async fn cleanup_expired(&self) -> (u64, u64) {
        let sessions = match self.sessions.cleanup_expired().await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(error = %e, "Session cleanup failed");
                0
            }
        };
        let tickets = match self.tickets.cleanup_expired().await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(error = %e, "Ticket cleanup failed");
                0
            }
        };
        let codes = self.authsps.cleanup_expired();
        if codes > 0 {
            tracing::debug!(codes = codes, "Dropped expired one-time codes");
        }
        (sessions, tickets)
    }
}
