//! Portunus Trust Envelope
//!
//! Signing and verification of protocol messages, plus sealing of ticket
//! references.
//!
//! # Modules
//!
//! - [`signing`] - RSA/HMAC signers and the per-authority trust store
//! - [`sealing`] - AES-GCM ticket sealing
//! - [`message`] - Canonical field concatenation per message type
//! - [`error`] - Error types

pub mod error;
pub mod message;
pub mod sealing;
pub mod signing;

use std::sync::Arc;

use portunus_core::{AuthorityId, TicketId};

pub use error::EnvelopeError;
pub use message::{SignedFields, VerifyResponseFields};
pub use sealing::{AeadSealer, SealingKey, SealingKeyPolicy, TicketCipher, TicketSealer};
pub use signing::{
    generate_rsa_key_pair, KeySigner, MessageSigner, SignatureAlgorithm, SigningKey, TrustStore,
    VerificationKey,
};

/// The broker's signer and sealer, shared across request handlers.
#[derive(Clone)]
pub struct TrustEnvelope {
    signer: Arc<dyn MessageSigner>,
    sealer: Arc<dyn TicketSealer>,
}

impl TrustEnvelope {
    #[must_use]
    pub fn new(signer: Arc<dyn MessageSigner>, sealer: Arc<dyn TicketSealer>) -> Self {
        Self { signer, sealer }
    }

    /// The authority id this broker signs as.
    #[must_use]
    pub fn authority(&self) -> &AuthorityId {
        self.signer.authority()
    }

    /// Signs the concatenated fields and returns the base64 signature.
    pub fn sign_fields(&self, fields: &SignedFields) -> Result<String, EnvelopeError> {
        self.signer.sign(fields.as_bytes())
    }

    /// Verifies `signature` of `authority` over the concatenated fields.
    #[must_use]
    pub fn verify_fields(
        &self,
        authority: &AuthorityId,
        fields: &SignedFields,
        signature: &str,
    ) -> bool {
        self.signer.verify(authority, fields.as_bytes(), signature)
    }

    /// Seals a ticket id for the wire.
    pub fn seal_ticket(&self, id: &TicketId) -> Result<String, EnvelopeError> {
        self.sealer.seal(id.as_str().as_bytes())
    }

    /// Opens a sealed ticket reference.
    pub fn open_ticket(&self, sealed: &str) -> Result<TicketId, EnvelopeError> {
        let bytes = self.sealer.open(sealed)?;
        let text = String::from_utf8(bytes)
            .map_err(|_| EnvelopeError::OpenFailed("ticket id is not UTF-8".to_string()))?;
        text.parse::<TicketId>()
            .map_err(|e| EnvelopeError::OpenFailed(e.to_string()))
    }
}

impl std::fmt::Debug for TrustEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustEnvelope")
            .field("authority", self.authority())
            .finish_non_exhaustive()
    }
}
