//! Startup resolution of AuthSP descriptors into backends.

use portunus_core::{AuthLevel, AuthspId};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::backend::AuthspBackend;
use crate::backends::{
    HttpDelegateBackend, HttpDelegateSettings, LdapBackend, LdapSettings, PasswordBackend,
    PasswordEntry, SmsBackend, SmsSettings,
};
use crate::descriptor::AuthspDescriptor;
use crate::error::{AuthspError, AuthspResult};

/// Backend kind and its settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    Password {
        #[serde(default)]
        users: Vec<PasswordEntry>,
    },
    Ldap(LdapSettings),
    Sms(SmsSettings),
    HttpDelegate(HttpDelegateSettings),
}

impl BackendConfig {
    /// Whether the backend talks to an endpoint picked by the resource selector.
    #[must_use]
    pub fn needs_resource(&self) -> bool {
        !matches!(self, BackendConfig::Password { .. })
    }
}

/// A descriptor together with its resolved backend.
#[derive(Clone)]
pub struct RegisteredAuthsp {
    pub descriptor: Arc<AuthspDescriptor>,
    pub backend: Arc<dyn AuthspBackend>,
}

impl std::fmt::Debug for RegisteredAuthsp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredAuthsp")
            .field("id", &self.descriptor.id)
            .field("kind", &self.backend.kind())
            .finish()
    }
}

/// All configured AuthSPs, immutable after startup.
#[derive(Debug, Clone, Default)]
pub struct AuthspRegistry {
    entries: BTreeMap<AuthspId, RegisteredAuthsp>,
    sms: Vec<Arc<SmsBackend>>,
}

impl AuthspRegistry {
    /// Builds every backend. `client` is shared by the HTTP based backends
    /// and must carry the back-channel timeout.
    pub fn build(
        descriptors: Vec<AuthspDescriptor>,
        client: reqwest::Client,
        timeout: Duration,
    ) -> AuthspResult<Self> {
        let mut registry = Self::default();
        for descriptor in descriptors {
            if descriptor.backend.needs_resource() && descriptor.resource_group.is_none() {
                return Err(AuthspError::Configuration(format!(
                    "AuthSP {} needs a resource_group",
                    descriptor.id
                )));
            }

            let backend: Arc<dyn AuthspBackend> = match &descriptor.backend {
                BackendConfig::Password { users } => Arc::new(
                    PasswordBackend::new(users.clone()).map_err(|e| {
                        AuthspError::Configuration(format!("AuthSP {}: {e}", descriptor.id))
                    })?,
                ),
                BackendConfig::Ldap(settings) => {
                    Arc::new(LdapBackend::new(settings.clone(), timeout))
                }
                BackendConfig::Sms(settings) => {
                    let sms = Arc::new(SmsBackend::new(settings.clone(), client.clone()).map_err(
                        |e| AuthspError::Configuration(format!("AuthSP {}: {e}", descriptor.id)),
                    )?);
                    registry.sms.push(sms.clone());
                    sms
                }
                BackendConfig::HttpDelegate(settings) => {
                    Arc::new(HttpDelegateBackend::new(settings.clone(), client.clone()))
                }
            };
            registry.insert(descriptor, backend)?;
        }
        registry.validate_chains()?;
        info!(count = registry.entries.len(), "AuthSP registry built");
        Ok(registry)
    }

    /// Registers a descriptor with an already constructed backend.
    pub fn insert(
        &mut self,
        descriptor: AuthspDescriptor,
        backend: Arc<dyn AuthspBackend>,
    ) -> AuthspResult<()> {
        if self.entries.contains_key(&descriptor.id) {
            return Err(AuthspError::Configuration(format!(
                "Duplicate AuthSP id {}",
                descriptor.id
            )));
        }
        self.entries.insert(
            descriptor.id.clone(),
            RegisteredAuthsp {
                descriptor: Arc::new(descriptor),
                backend,
            },
        );
        Ok(())
    }

    /// Rejects unknown next-AuthSP targets and cyclic chains.
    pub fn validate_chains(&self) -> AuthspResult<()> {
        for start in self.entries.keys() {
            let mut seen = HashSet::new();
            let mut current = start;
            while let Some(next) = self
                .entries
                .get(current)
                .and_then(|entry| entry.descriptor.next_authsp.as_ref())
            {
                if !self.entries.contains_key(next) {
                    return Err(AuthspError::Configuration(format!(
                        "AuthSP {current} chains to unknown AuthSP {next}"
                    )));
                }
                if !seen.insert(next.clone()) || next == start {
                    return Err(AuthspError::Configuration(format!(
                        "AuthSP chain starting at {start} is cyclic"
                    )));
                }
                current = next;
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &AuthspId) -> AuthspResult<&RegisteredAuthsp> {
        self.entries
            .get(id)
            .ok_or_else(|| AuthspError::UnknownAuthsp(id.to_string()))
    }

    /// AuthSPs whose level satisfies `required`, weakest first.
    #[must_use]
    pub fn eligible(&self, required: AuthLevel) -> Vec<Arc<AuthspDescriptor>> {
        let mut eligible: Vec<Arc<AuthspDescriptor>> = self
            .entries
            .values()
            .filter(|entry| entry.descriptor.level.satisfies(required))
            .map(|entry| entry.descriptor.clone())
            .collect();
        eligible.sort_by(|a, b| a.level.cmp(&b.level).then_with(|| a.id.cmp(&b.id)));
        eligible
    }

    /// Resource groups referenced by any AuthSP.
    #[must_use]
    pub fn resource_groups(&self) -> Vec<&str> {
        self.entries
            .values()
            .filter_map(|entry| entry.descriptor.resource_group.as_deref())
            .collect()
    }

    /// Drops expired pending one-time codes.
    pub fn cleanup_expired(&self) -> usize {
        self.sms.iter().map(|sms| sms.cleanup_expired()).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptors(json: &str) -> Vec<AuthspDescriptor> {
        serde_json::from_str(json).unwrap()
    }

    fn build(json: &str) -> AuthspResult<AuthspRegistry> {
        AuthspRegistry::build(
            descriptors(json),
            reqwest::Client::new(),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_build_all_kinds() {
        let registry = build(
            r#"[
                {"id": "pw", "friendly_name": "Password", "level": 10,
                 "backend": {"kind": "password"}},
                {"id": "dir", "friendly_name": "Directory", "level": 20, "resource_group": "ldap",
                 "backend": {"kind": "ldap", "base_dn": "dc=example,dc=org"}},
                {"id": "sms", "friendly_name": "SMS", "level": 30, "resource_group": "sms-gw",
                 "backend": {"kind": "sms", "recipients": {}}},
                {"id": "ext", "friendly_name": "External", "level": 30, "resource_group": "ext",
                 "backend": {"kind": "http_delegate", "path": "/verify"}}
            ]"#,
        )
        .unwrap();
        assert_eq!(registry.len(), 4);
        assert_eq!(
            registry.get(&AuthspId::new("dir")).unwrap().backend.kind(),
            "ldap"
        );
        assert_eq!(registry.resource_groups().len(), 3);
    }

    #[test]
    fn test_eligible_by_level() {
        let registry = build(
            r#"[
                {"id": "strong", "friendly_name": "Strong", "level": 30,
                 "backend": {"kind": "password"}},
                {"id": "weak", "friendly_name": "Weak", "level": 5,
                 "backend": {"kind": "password"}},
                {"id": "medium", "friendly_name": "Medium", "level": 10,
                 "backend": {"kind": "password"}}
            ]"#,
        )
        .unwrap();
        let ids: Vec<String> = registry
            .eligible(AuthLevel(10))
            .iter()
            .map(|d| d.id.to_string())
            .collect();
        assert_eq!(ids, vec!["medium", "strong"]);
        assert!(registry.eligible(AuthLevel(50)).is_empty());
    }

    #[test]
    fn test_remote_backend_without_group_is_rejected() {
        let result = build(
            r#"[{"id": "dir", "friendly_name": "Directory", "level": 20,
                 "backend": {"kind": "ldap", "base_dn": "dc=example,dc=org"}}]"#,
        );
        assert!(matches!(result, Err(AuthspError::Configuration(_))));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = build(
            r#"[
                {"id": "pw", "friendly_name": "A", "level": 10, "backend": {"kind": "password"}},
                {"id": "pw", "friendly_name": "B", "level": 10, "backend": {"kind": "password"}}
            ]"#,
        );
        assert!(matches!(result, Err(AuthspError::Configuration(_))));
    }

    #[test]
    fn test_chain_validation() {
        let unknown = build(
            r#"[{"id": "pw", "friendly_name": "A", "level": 10, "next_authsp": "nope",
                 "backend": {"kind": "password"}}]"#,
        );
        assert!(matches!(unknown, Err(AuthspError::Configuration(_))));

        let cyclic = build(
            r#"[
                {"id": "a", "friendly_name": "A", "level": 10, "next_authsp": "b",
                 "backend": {"kind": "password"}},
                {"id": "b", "friendly_name": "B", "level": 10, "next_authsp": "a",
                 "backend": {"kind": "password"}}
            ]"#,
        );
        assert!(matches!(cyclic, Err(AuthspError::Configuration(_))));

        let linear = build(
            r#"[
                {"id": "a", "friendly_name": "A", "level": 10, "next_authsp": "b",
                 "backend": {"kind": "password"}},
                {"id": "b", "friendly_name": "B", "level": 20,
                 "backend": {"kind": "password"}}
            ]"#,
        );
        assert!(linear.is_ok());
    }

    #[test]
    fn test_unknown_authsp() {
        let registry = AuthspRegistry::default();
        assert!(matches!(
            registry.get(&AuthspId::new("x")),
            Err(AuthspError::UnknownAuthsp(_))
        ));
    }
}
