//! Authentication levels and the user attribute bag.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::error::CoreError;

/// Strength of an authentication. Higher is stronger.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct AuthLevel(pub u32);

impl AuthLevel {
    /// Returns true when this level satisfies `required`.
    #[must_use]
    pub fn satisfies(&self, required: AuthLevel) -> bool {
        *self >= required
    }
}

impl Display for AuthLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AuthLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map(AuthLevel)
            .map_err(|_| CoreError::InvalidLevel(s.to_string()))
    }
}

/// Multi-valued user attributes carried by tickets.
///
/// Ordered so the serialized form is deterministic, which matters because
/// it is part of signed messages.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeBag(BTreeMap<String, Vec<String>>);

impl AttributeBag {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of one value.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Adds a value under `key`, ignoring exact duplicates.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let values = self.0.entry(key.into()).or_default();
        let value = value.into();
        if !values.contains(&value) {
            values.push(value);
        }
    }

    /// Returns all values stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(Vec::as_slice)
    }

    /// Returns the first value stored under `key`.
    #[must_use]
    pub fn first(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over `(key, values)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    /// Unions `other` into this bag. Existing values are kept.
    pub fn union(&mut self, other: &AttributeBag) {
        for (key, values) in &other.0 {
            for value in values {
                self.insert(key.clone(), value.clone());
            }
        }
    }

    /// Encodes the bag for a URL parameter or form field.
    ///
    /// Format: unpadded base64url of the JSON object.
    pub fn to_wire(&self) -> Result<String, CoreError> {
        let json = serde_json::to_vec(&self.0)
            .map_err(|e| CoreError::InvalidAttributes(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Decodes a bag produced by [`AttributeBag::to_wire`].
    pub fn from_wire(encoded: &str) -> Result<Self, CoreError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|e| CoreError::InvalidAttributes(format!("invalid base64: {e}")))?;
        let map: BTreeMap<String, Vec<String>> = serde_json::from_slice(&bytes)
            .map_err(|e| CoreError::InvalidAttributes(format!("invalid JSON: {e}")))?;
        Ok(Self(map))
    }
}

impl FromIterator<(String, String)> for AttributeBag {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut bag = AttributeBag::new();
        for (key, value) in iter {
            bag.insert(key, value);
        }
        bag
    }
}
