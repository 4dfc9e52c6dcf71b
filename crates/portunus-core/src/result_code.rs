//! Wire result codes.
//!
//! Result codes are short fixed strings that are signed and redirected back
//! to applications and peer brokers. The textual values are part of the wire
//! contract and must never change.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Result code returned on every back-channel response and redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    /// The request succeeded.
    Success,
    /// Unexpected failure inside the broker.
    InternalError,
    /// A backend or peer could not be reached or answered garbage.
    BackendUnavailable,
    /// The ticket exists but has expired.
    TgtExpired,
    /// The ticket or a peer response is structurally invalid.
    TgtNotValid,
    /// No ticket is known for the presented value.
    UnknownTgt,
    /// No AuthSP satisfies the required authentication level.
    LevelNotAvailable,
    /// The application id is not configured.
    UnknownApp,
    /// The organization or authority id is not configured.
    UnknownOrganization,
    /// The AuthSP id is not configured.
    UnknownAuthsp,
    /// Missing or malformed fields, or a signature mismatch.
    InvalidRequest,
    /// The RID is unknown or its session expired.
    SessionExpired,
    /// The user could not be authenticated.
    AuthspAccessDenied,
    /// The user cancelled the authentication.
    Cancel,
}

impl ResultCode {
    /// All codes, in table order.
    pub const ALL: [ResultCode; 14] = [
        ResultCode::Success,
        ResultCode::InternalError,
        ResultCode::BackendUnavailable,
        ResultCode::TgtExpired,
        ResultCode::TgtNotValid,
        ResultCode::UnknownTgt,
        ResultCode::LevelNotAvailable,
        ResultCode::UnknownApp,
        ResultCode::UnknownOrganization,
        ResultCode::UnknownAuthsp,
        ResultCode::InvalidRequest,
        ResultCode::SessionExpired,
        ResultCode::AuthspAccessDenied,
        ResultCode::Cancel,
    ];

    /// Returns the wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultCode::Success => "0000",
            ResultCode::InternalError => "0001",
            ResultCode::BackendUnavailable => "0002",
            ResultCode::TgtExpired => "0004",
            ResultCode::TgtNotValid => "0005",
            ResultCode::UnknownTgt => "0006",
            ResultCode::LevelNotAvailable => "0007",
            ResultCode::UnknownApp => "0008",
            ResultCode::UnknownOrganization => "0009",
            ResultCode::UnknownAuthsp => "0010",
            ResultCode::InvalidRequest => "0030",
            ResultCode::SessionExpired => "0102",
            ResultCode::AuthspAccessDenied => "0400",
            ResultCode::Cancel => "0401",
        }
    }

    /// Returns true for [`ResultCode::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ResultCode::Success)
    }

    /// Returns true for codes that mean "try again later" rather than a
    /// decision about the user.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            ResultCode::InternalError | ResultCode::BackendUnavailable
        )
    }
}

impl Display for ResultCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for a code that is not in the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownResultCode(pub String);

impl Display for UnknownResultCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unknown result code: {}", self.0)
    }
}

impl std::error::Error for UnknownResultCode {}

impl FromStr for ResultCode {
    type Err = UnknownResultCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResultCode::ALL
            .iter()
            .find(|code| code.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownResultCode(s.to_string()))
    }
}

impl Serialize for ResultCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ResultCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}
