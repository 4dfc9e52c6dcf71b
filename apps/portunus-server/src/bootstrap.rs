//! Startup wiring: registry file, keys, stores and the broker state.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use portunus_api_broker::{
    ApplicationDescriptor, ApplicationRegistry, BrokerConfig, BrokerError, BrokerState,
    OrganizationDescriptor, OrganizationRegistry,
};
use portunus_authsp::{AuthspDescriptor, AuthspError, AuthspRegistry};
use portunus_core::{AuthorityId, OrganizationId};
use portunus_envelope::{
    AeadSealer, EnvelopeError, KeySigner, SealingKey, SignatureAlgorithm, SigningKey,
    TrustEnvelope, TrustStore, VerificationKey,
};
use portunus_resources::{ResourceGroup, ResourceSelector, TcpProbe};
use portunus_store::{InMemorySessionStore, InMemoryTicketStore};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::config::Config;

/// Contents of the registry file.
#[derive(Debug, Default, Deserialize)]
pub struct RegistryDocument {
    #[serde(default)]
    pub applications: Vec<ApplicationDescriptor>,
    #[serde(default)]
    pub authsps: Vec<AuthspDescriptor>,
    #[serde(default)]
    pub organizations: Vec<OrganizationDescriptor>,
    #[serde(default)]
    pub resource_groups: Vec<ResourceGroup>,
    #[serde(default)]
    pub trusted_keys: Vec<TrustedKey>,
}

/// A verification key of a peer broker or application.
#[derive(Debug, Deserialize)]
pub struct TrustedKey {
    pub authority: String,
    /// Rotation alias (`alias`, `alias1`, ...). Absent for the base key.
    #[serde(default)]
    pub alias: Option<String>,
    pub algorithm: SignatureAlgorithm,
    /// PEM public key for RSA, base64 secret for HMAC.
    pub key: String,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Failed to read registry file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid registry file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid key for {owner}: {source}")]
    Key {
        owner: String,
        source: EnvelopeError,
    },

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Authsp(#[from] AuthspError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("{0}")]
    Inconsistent(String),
}

/// Reads and parses the registry file named in `config`.
pub fn load(config: &Config) -> Result<RegistryDocument, BootstrapError> {
    let raw = std::fs::read_to_string(&config.registry_file).map_err(|source| {
        BootstrapError::Read {
            path: config.registry_file.display().to_string(),
            source,
        }
    })?;
    Ok(serde_json::from_str(&raw)?)
}

fn decode_secret(owner: &str, encoded: &str) -> Result<Vec<u8>, BootstrapError> {
    BASE64
        .decode(encoded.trim())
        .map_err(|e| BootstrapError::Key {
            owner: owner.to_string(),
            source: EnvelopeError::InvalidKey(format!("Invalid base64 secret: {e}")),
        })
}

fn signing_key(config: &Config) -> Result<SigningKey, BootstrapError> {
    let owner = config.server_id.as_str();
    let key = match config.signature_algorithm {
        SignatureAlgorithm::RsaSha256 => SigningKey::rsa_from_pem(&config.signing_key),
        SignatureAlgorithm::HmacSha256 => {
            SigningKey::hmac(decode_secret(owner, &config.signing_key)?)
        }
    };
    key.map_err(|source| BootstrapError::Key {
        owner: owner.to_string(),
        source,
    })
}

fn trust_store(keys: &[TrustedKey]) -> Result<TrustStore, BootstrapError> {
    let mut trust = TrustStore::new();
    for entry in keys {
        let key = match entry.algorithm {
            SignatureAlgorithm::RsaSha256 => VerificationKey::rsa_from_pem(&entry.key),
            SignatureAlgorithm::HmacSha256 => {
                VerificationKey::hmac(decode_secret(&entry.authority, &entry.key)?)
            }
        }
        .map_err(|source| BootstrapError::Key {
            owner: entry.authority.clone(),
            source,
        })?;

        let authority = AuthorityId::new(entry.authority.as_str());
        match &entry.alias {
            Some(alias) => trust.insert_alias(authority, alias.as_str(), key),
            None => trust.insert(authority, key),
        }
    }
    Ok(trust)
}

/// Builds the broker state from configuration and registry contents.
///
/// Every cross reference is checked here: resource groups named by AuthSPs
/// and peers, and forced AuthSPs of applications.
pub fn build_state(config: &Config, registry: RegistryDocument) -> Result<BrokerState, BootstrapError> {
    let server_id = AuthorityId::new(config.server_id.as_str());

    let trust = trust_store(&registry.trusted_keys)?;
    let trusted = trust.len();
    let signer = KeySigner::new(
        server_id.clone(),
        config.signature_algorithm,
        signing_key(config)?,
        trust,
    )
    .map_err(|source| BootstrapError::Key {
        owner: config.server_id.clone(),
        source,
    })?;
    let sealing_key = SealingKey::from_policy(config.ticket_cipher, &config.ticket_key_policy)
        .map_err(|source| BootstrapError::Key {
            owner: "ticket sealing".to_string(),
            source,
        })?;
    let envelope = TrustEnvelope::new(Arc::new(signer), Arc::new(AeadSealer::new(sealing_key)));

    let http = reqwest::Client::builder()
        .timeout(config.backchannel_timeout)
        .build()?;

    let authsps = AuthspRegistry::build(
        registry.authsps,
        http.clone(),
        config.backchannel_timeout,
    )?;
    let selector = ResourceSelector::new(
        registry.resource_groups,
        Arc::new(TcpProbe::new(config.backchannel_timeout)),
        config.resource_refresh,
    );
    let organizations = OrganizationRegistry::new(registry.organizations)?;
    for group in authsps
        .resource_groups()
        .into_iter()
        .chain(organizations.resource_groups())
    {
        if !selector.has_group(group) {
            return Err(BootstrapError::Inconsistent(format!(
                "Unknown resource group {group}"
            )));
        }
    }

    let applications = ApplicationRegistry::new(registry.applications)?;
    for app in applications.iter() {
        if let Some(forced) = &app.forced_authsp {
            authsps.get(forced).map_err(|_| {
                BootstrapError::Inconsistent(format!(
                    "Application {} forces unknown AuthSP {forced}",
                    app.id
                ))
            })?;
        }
    }

    let mut broker = BrokerConfig::new(
        server_id,
        OrganizationId::new(config.organization.as_str()),
        config.public_url.as_str(),
    );
    broker.single_sign_on = config.single_sign_on;
    broker.sign_requests = config.sign_requests;
    broker.session_ttl_seconds = config.session_ttl_seconds;
    broker.ticket_ttl_seconds = config.ticket_ttl_seconds;

    info!(
        applications = applications.len(),
        authsps = authsps.len(),
        organizations = organizations.len(),
        trusted_keys = trusted,
        "Registry loaded"
    );

    Ok(BrokerState::new(
        broker,
        envelope,
        Arc::new(InMemorySessionStore::new()),
        Arc::new(InMemoryTicketStore::new()),
        authsps,
        applications,
        organizations,
        selector,
        http,
    ))
}
