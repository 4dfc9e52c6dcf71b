//! Strongly Typed Identifiers
//!
//! Two families of identifiers are used by the broker:
//!
//! - Random correlation values ([`Rid`], [`TicketId`]) generated from the
//!   operating system CSPRNG. They are 256-bit values rendered as unpadded
//!   base64url so they can travel in URLs and cookies unescaped.
//! - Configured names ([`AuthorityId`], [`AppId`], [`AuthspId`],
//!   [`OrganizationId`]) that come from the registry document.
//!
//! A `Rid` and a `TicketId` are distinct types: a request id can never be
//! presented where a ticket is expected.
//!
//! # Example
//!
//! ```
//! use portunus_core::{Rid, TicketId};
//!
//! let rid = Rid::generate();
//! let ticket = TicketId::generate();
//! assert_ne!(rid.as_str(), ticket.as_str());
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Number of random bytes behind a [`Rid`] or [`TicketId`].
pub const RANDOM_ID_BYTES: usize = 32;

/// Error type for identifier parsing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse
    pub id_type: &'static str,
    /// Why the value was rejected
    pub message: String,
}

impl Display for ParseIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse {}: {}", self.id_type, self.message)
    }
}

impl std::error::Error for ParseIdError {}

/// Returns true when `s` only contains characters of the base64url alphabet.
fn is_url_safe(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Defines a random, high-entropy identifier.
macro_rules! define_random_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generates a new identifier from 256 bits of OS randomness.
            #[must_use]
            pub fn generate() -> Self {
                let mut bytes = [0u8; RANDOM_ID_BYTES];
                OsRng.fill_bytes(&mut bytes);
                Self(URL_SAFE_NO_PAD.encode(bytes))
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the identifier and returns the inner string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.is_empty() {
                    return Err(ParseIdError {
                        id_type: stringify!($name),
                        message: "empty value".to_string(),
                    });
                }
                if s.len() > 128 || !is_url_safe(s) {
                    return Err(ParseIdError {
                        id_type: stringify!($name),
                        message: "not a base64url value".to_string(),
                    });
                }
                Ok(Self(s.to_string()))
            }
        }
    };
}

/// Defines an identifier whose value is a configured name.
macro_rules! define_name_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates the identifier from a configured name.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(ParseIdError {
                        id_type: stringify!($name),
                        message: "empty value".to_string(),
                    });
                }
                Ok(Self(trimmed.to_string()))
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

define_random_id!(
    /// Request id: correlates every message of one authentication attempt.
    ///
    /// Also used as the delegation correlation key towards peer brokers, so
    /// it must never be guessable.
    Rid
);

define_random_id!(
    /// Key of a persisted Ticket-Granting Ticket.
    ///
    /// Never leaves the broker in plaintext; browsers and applications only
    /// see it sealed by the trust envelope.
    TicketId
);

define_name_id!(
    /// Identifier of a broker instance (the `a-select-server` field).
    AuthorityId
);

define_name_id!(
    /// Identifier of a requesting application.
    AppId
);

define_name_id!(
    /// Identifier of a configured AuthSP.
    AuthspId
);

define_name_id!(
    /// Identifier of an organization (local or peer).
    OrganizationId
);

impl From<AuthorityId> for OrganizationId {
    fn from(value: AuthorityId) -> Self {
        Self(value.0)
    }
}
