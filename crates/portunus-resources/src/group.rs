//! Resource group configuration.

use serde::Deserialize;

/// One backend endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Resource {
    pub id: String,
    pub url: String,
}

/// An ordered pool of interchangeable endpoints. Earlier entries are
/// preferred.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceGroup {
    pub name: String,
    pub resources: Vec<Resource>,
}

impl ResourceGroup {
    #[must_use]
    pub fn new(name: impl Into<String>, resources: Vec<Resource>) -> Self {
        Self {
            name: name.into(),
            resources,
        }
    }

    /// Convenience constructor for a group with a single endpoint.
    #[must_use]
    pub fn single(name: impl Into<String>, url: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            resources: vec![Resource {
                id: format!("{name}-1"),
                url: url.into(),
            }],
            name,
        }
    }
}
