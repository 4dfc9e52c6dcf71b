//! Registered applications

use portunus_core::{AppId, AuthLevel, AuthspId};
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::{BrokerError, BrokerResult};

/// An application allowed to request authentications.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationDescriptor {
    pub id: AppId,
    #[serde(default)]
    pub friendly_name: Option<String>,
    /// Level every authentication for this application must reach.
    pub level: AuthLevel,
    /// Accepted `app_url` prefixes. Empty accepts any http(s) URL.
    #[serde(default)]
    pub return_url_prefixes: Vec<String>,
    /// The application signs its back-channel requests.
    #[serde(default)]
    pub require_signing: bool,
    /// Skip the selection form and always use this AuthSP.
    #[serde(default)]
    pub forced_authsp: Option<AuthspId>,
    #[serde(default)]
    pub sso_groups: Vec<String>,
}

impl ApplicationDescriptor {
    #[must_use]
    pub fn allows_return_url(&self, candidate: &str) -> bool {
        allows_return_url(&self.return_url_prefixes, candidate)
    }

    /// Whether a ticket issued for `groups` may be reused by this application.
    #[must_use]
    pub fn shares_sso_group(&self, groups: &[String]) -> bool {
        if self.sso_groups.is_empty() && groups.is_empty() {
            return true;
        }
        self.sso_groups.iter().any(|group| groups.contains(group))
    }
}

/// Checks `candidate` against a list of allowed URL prefixes.
pub(crate) fn allows_return_url(prefixes: &[String], candidate: &str) -> bool {
    let Ok(url) = url::Url::parse(candidate) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    prefixes.is_empty() || prefixes.iter().any(|prefix| candidate.starts_with(prefix))
}

/// Applications by id, immutable after startup.
#[derive(Debug, Clone, Default)]
pub struct ApplicationRegistry {
    apps: HashMap<AppId, ApplicationDescriptor>,
}

impl ApplicationRegistry {
    pub fn new(descriptors: Vec<ApplicationDescriptor>) -> BrokerResult<Self> {
        let mut apps = HashMap::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if apps.contains_key(&descriptor.id) {
                return Err(BrokerError::Configuration(format!(
                    "Duplicate application id {}",
                    descriptor.id
                )));
            }
            apps.insert(descriptor.id.clone(), descriptor);
        }
        Ok(Self { apps })
    }

    pub fn get(&self, id: &AppId) -> BrokerResult<&ApplicationDescriptor> {
        self.apps
            .get(id)
            .ok_or_else(|| BrokerError::UnknownApp(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ApplicationDescriptor> {
        self.apps.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.apps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(groups: &[&str]) -> ApplicationDescriptor {
        ApplicationDescriptor {
            id: AppId::new("app1"),
            friendly_name: None,
            level: AuthLevel(10),
            return_url_prefixes: vec!["https://app.example.org/".to_string()],
            require_signing: false,
            forced_authsp: None,
            sso_groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    #[test]
    fn test_return_url_prefix() {
        let app = app(&[]);
        assert!(app.allows_return_url("https://app.example.org/return?x=1"));
        assert!(!app.allows_return_url("https://evil.example.org/"));
        assert!(!app.allows_return_url("not a url"));
    }

    #[test]
    fn test_empty_prefixes_still_require_http() {
        assert!(allows_return_url(&[], "http://localhost:8080/cb"));
        assert!(!allows_return_url(&[], "javascript:alert(1)"));
    }

    #[test]
    fn test_sso_groups() {
        assert!(app(&[]).shares_sso_group(&[]));
        assert!(app(&["staff"]).shares_sso_group(&["staff".to_string()]));
        assert!(!app(&["staff"]).shares_sso_group(&["students".to_string()]));
        assert!(!app(&[]).shares_sso_group(&["staff".to_string()]));
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        assert!(ApplicationRegistry::new(vec![app(&[]), app(&[])]).is_err());
        let registry = ApplicationRegistry::new(vec![app(&[])]).unwrap();
        assert!(registry.get(&AppId::new("app1")).is_ok());
        assert!(matches!(
            registry.get(&AppId::new("nope")),
            Err(BrokerError::UnknownApp(_))
        ));
    }
}
