//! Broker services

pub mod applications;
pub mod authenticate;
pub mod credentials;
pub mod cross_domain;
pub mod login;
pub mod organizations;
pub mod ticket_issuer;

use portunus_core::AuthorityId;
use portunus_envelope::{SignedFields, TrustEnvelope};

use crate::error::{BrokerError, BrokerResult};

/// Appends query parameters to `base`, keeping any query it already has.
pub(crate) fn with_query(base: &str, pairs: &[(&str, &str)]) -> BrokerResult<String> {
    let mut url = url::Url::parse(base)
        .map_err(|e| BrokerError::InvalidRequest(format!("invalid URL {base}: {e}")))?;
    url.query_pairs_mut().extend_pairs(pairs.iter());
    Ok(url.into())
}

/// Checks the signature of `authority` over `fields`.
///
/// A present signature must always verify; an absent one is only accepted
/// when signing is not required for this party.
pub(crate) fn check_signature(
    envelope: &TrustEnvelope,
    authority: &str,
    fields: &SignedFields,
    signature: Option<&str>,
    required: bool,
) -> BrokerResult<()> {
    match signature.filter(|s| !s.is_empty()) {
        Some(signature) => {
            if envelope.verify_fields(&AuthorityId::new(authority), fields, signature) {
                Ok(())
            } else {
                tracing::warn!(authority = %authority, "Signature verification failed");
                Err(BrokerError::InvalidSignature(authority.to_string()))
            }
        }
        None if required => Err(BrokerError::InvalidSignature(authority.to_string())),
        None => Ok(()),
    }
}
