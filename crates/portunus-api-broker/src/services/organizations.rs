//! Peer organizations (other broker instances)

use portunus_authsp::FailureHandling;
use portunus_core::{AuthLevel, OrganizationId, ResultCode};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::{BrokerError, BrokerResult};
use crate::services::applications::allows_return_url;

fn default_cancel_code() -> ResultCode {
    ResultCode::Cancel
}

fn default_require_signing() -> bool {
    true
}

/// A peer broker we delegate to, or accept delegations from.
///
/// The id doubles as the peer's authority id for signature verification.
#[derive(Debug, Clone, Deserialize)]
pub struct OrganizationDescriptor {
    pub id: OrganizationId,
    #[serde(default)]
    pub friendly_name: Option<String>,
    /// The peer's `/cross/login` entry point.
    #[serde(default)]
    pub login_url: Option<String>,
    /// Resource group holding the peer's back-channel `/api` endpoints.
    #[serde(default)]
    pub resource_group: Option<String>,
    /// Result code the peer uses for a user-initiated cancel.
    #[serde(default = "default_cancel_code")]
    pub cancel_code: ResultCode,
    /// Accepted `as_url` prefixes when the peer delegates to us.
    #[serde(default)]
    pub return_url_prefixes: Vec<String>,
    /// The peer's requests and responses must carry a valid signature.
    #[serde(default = "default_require_signing")]
    pub require_signing: bool,
    #[serde(default)]
    pub failure_handling: FailureHandling,
    /// Offered on the selection form when this level covers the request.
    #[serde(default)]
    pub offered_level: Option<AuthLevel>,
}

impl OrganizationDescriptor {
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.friendly_name.as_deref().unwrap_or(self.id.as_str())
    }

    /// Whether we can delegate authentications to this peer.
    #[must_use]
    pub fn accepts_delegation(&self) -> bool {
        self.login_url.is_some() && self.resource_group.is_some()
    }

    #[must_use]
    pub fn allows_return_url(&self, candidate: &str) -> bool {
        allows_return_url(&self.return_url_prefixes, candidate)
    }
}

/// Peer organizations by id, immutable after startup.
#[derive(Debug, Clone, Default)]
pub struct OrganizationRegistry {
    organizations: BTreeMap<OrganizationId, OrganizationDescriptor>,
}

impl OrganizationRegistry {
    pub fn new(descriptors: Vec<OrganizationDescriptor>) -> BrokerResult<Self> {
        let mut organizations = BTreeMap::new();
        for descriptor in descriptors {
            if descriptor.login_url.is_some() != descriptor.resource_group.is_some() {
                return Err(BrokerError::Configuration(format!(
                    "Organization {} needs both login_url and resource_group to accept delegations",
                    descriptor.id
                )));
            }
            if let Some(login_url) = &descriptor.login_url {
                url::Url::parse(login_url).map_err(|e| {
                    BrokerError::Configuration(format!(
                        "Organization {} has an invalid login_url: {e}",
                        descriptor.id
                    ))
                })?;
            }
            if organizations.contains_key(&descriptor.id) {
                return Err(BrokerError::Configuration(format!(
                    "Duplicate organization id {}",
                    descriptor.id
                )));
            }
            organizations.insert(descriptor.id.clone(), descriptor);
        }
        Ok(Self { organizations })
    }

    pub fn get(&self, id: &OrganizationId) -> BrokerResult<&OrganizationDescriptor> {
        self.organizations
            .get(id)
            .ok_or_else(|| BrokerError::UnknownOrganization(id.to_string()))
    }

    /// Peers we can delegate to, for the selection form.
    #[must_use]
    pub fn selectable(&self, required: AuthLevel) -> Vec<&OrganizationDescriptor> {
        self.organizations
            .values()
            .filter(|org| org.accepts_delegation())
            .filter(|org| org.offered_level.is_some_and(|level| level.satisfies(required)))
            .collect()
    }

    /// Resource groups referenced by any peer.
    #[must_use]
    pub fn resource_groups(&self) -> Vec<&str> {
        self.organizations
            .values()
            .filter_map(|org| org.resource_group.as_deref())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.organizations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.organizations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(json: &str) -> OrganizationDescriptor {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_defaults() {
        let org = peer(r#"{"id": "org-b"}"#);
        assert_eq!(org.cancel_code, ResultCode::Cancel);
        assert!(org.require_signing);
        assert!(!org.accepts_delegation());
        assert_eq!(org.display_name(), "org-b");
    }

    #[test]
    fn test_selectable_by_level() {
        let registry = OrganizationRegistry::new(vec![
            peer(
                r#"{"id": "org-b", "login_url": "https://b.example.org/cross/login",
                    "resource_group": "org-b-api", "offered_level": 20}"#,
            ),
            peer(r#"{"id": "org-c"}"#),
        ])
        .unwrap();
        assert_eq!(registry.selectable(AuthLevel(10)).len(), 1);
        assert!(registry.selectable(AuthLevel(30)).is_empty());
        assert_eq!(registry.resource_groups(), vec!["org-b-api"]);
    }

    #[test]
    fn test_half_configured_delegation_is_rejected() {
        let result = OrganizationRegistry::new(vec![peer(
            r#"{"id": "org-b", "login_url": "https://b.example.org/cross/login"}"#,
        )]);
        assert!(matches!(result, Err(BrokerError::Configuration(_))));
    }

    #[test]
    fn test_unknown_organization() {
        let registry = OrganizationRegistry::default();
        assert_eq!(
            registry
                .get(&OrganizationId::new("x"))
                .unwrap_err()
                .result_code(),
            ResultCode::UnknownOrganization
        );
    }
}
