//! Ticket sealing.
//!
//! A ticket id never leaves the broker in the clear. Browsers and
//! applications see `base64url(nonce || ciphertext)` produced with the
//! broker's AEAD key.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Aes256Gcm, Nonce,
};
use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD},
    Engine,
};
use rand::RngCore;
use serde::Deserialize;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::error::EnvelopeError;

/// AES-GCM nonce size in bytes.
const NONCE_SIZE: usize = 12;

/// AEAD cipher used for ticket sealing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum TicketCipher {
    #[default]
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    #[serde(rename = "aes-128-gcm")]
    Aes128Gcm,
}

impl TicketCipher {
    /// Required key length in bytes.
    #[must_use]
    pub fn key_len(&self) -> usize {
        match self {
            TicketCipher::Aes256Gcm => 32,
            TicketCipher::Aes128Gcm => 16,
        }
    }
}

impl Display for TicketCipher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TicketCipher::Aes256Gcm => f.write_str("aes-256-gcm"),
            TicketCipher::Aes128Gcm => f.write_str("aes-128-gcm"),
        }
    }
}

impl FromStr for TicketCipher {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aes-256-gcm" | "aes256gcm" => Ok(TicketCipher::Aes256Gcm),
            "aes-128-gcm" | "aes128gcm" => Ok(TicketCipher::Aes128Gcm),
            other => Err(EnvelopeError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// Where the sealing key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SealingKeyPolicy {
    /// Fresh random key at every start. Outstanding tickets die on restart.
    Ephemeral,
    /// Base64 key material supplied by configuration.
    Persisted(String),
}

/// Raw AEAD key bound to its cipher.
#[derive(Clone)]
pub struct SealingKey {
    cipher: TicketCipher,
    bytes: Vec<u8>,
}

impl std::fmt::Debug for SealingKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealingKey")
            .field("cipher", &self.cipher)
            .finish_non_exhaustive()
    }
}

impl SealingKey {
    /// Generates a random key for `cipher`.
    #[must_use]
    pub fn generate(cipher: TicketCipher) -> Self {
        let mut bytes = vec![0u8; cipher.key_len()];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { cipher, bytes }
    }

    /// Builds a key from raw bytes, checking the length.
    pub fn from_bytes(cipher: TicketCipher, bytes: Vec<u8>) -> Result<Self, EnvelopeError> {
        if bytes.len() != cipher.key_len() {
            return Err(EnvelopeError::InvalidKey(format!(
                "{cipher} key must be {} bytes, got {}",
                cipher.key_len(),
                bytes.len()
            )));
        }
        Ok(Self { cipher, bytes })
    }

    /// Create from a base64-encoded key.
    pub fn from_base64(cipher: TicketCipher, encoded: &str) -> Result<Self, EnvelopeError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| EnvelopeError::InvalidKey(format!("Invalid base64 key: {e}")))?;
        Self::from_bytes(cipher, bytes)
    }

    /// Resolves a key according to the configured policy.
    pub fn from_policy(
        cipher: TicketCipher,
        policy: &SealingKeyPolicy,
    ) -> Result<Self, EnvelopeError> {
        match policy {
            SealingKeyPolicy::Ephemeral => Ok(Self::generate(cipher)),
            SealingKeyPolicy::Persisted(encoded) => Self::from_base64(cipher, encoded),
        }
    }

    #[must_use]
    pub fn cipher(&self) -> TicketCipher {
        self.cipher
    }
}

/// Seals and opens opaque ticket references.
pub trait TicketSealer: Send + Sync {
    /// Seals `plaintext` into a URL-safe string.
    fn seal(&self, plaintext: &[u8]) -> Result<String, EnvelopeError>;

    /// Opens a value produced by [`TicketSealer::seal`].
    fn open(&self, sealed: &str) -> Result<Vec<u8>, EnvelopeError>;
}

/// AES-GCM implementation of [`TicketSealer`].
#[derive(Debug, Clone)]
pub struct AeadSealer {
    key: SealingKey,
}

impl AeadSealer {
    #[must_use]
    pub fn new(key: SealingKey) -> Self {
        Self { key }
    }

    fn encrypt(&self, nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
        let nonce = Nonce::from_slice(nonce);
        let result = match self.key.cipher {
            TicketCipher::Aes256Gcm => Aes256Gcm::new_from_slice(&self.key.bytes)
                .map_err(|e| EnvelopeError::SealingFailed(e.to_string()))?
                .encrypt(nonce, plaintext),
            TicketCipher::Aes128Gcm => Aes128Gcm::new_from_slice(&self.key.bytes)
                .map_err(|e| EnvelopeError::SealingFailed(e.to_string()))?
                .encrypt(nonce, plaintext),
        };
        result.map_err(|e| EnvelopeError::SealingFailed(e.to_string()))
    }

    fn decrypt(&self, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
        let nonce = Nonce::from_slice(nonce);
        let result = match self.key.cipher {
            TicketCipher::Aes256Gcm => Aes256Gcm::new_from_slice(&self.key.bytes)
                .map_err(|e| EnvelopeError::OpenFailed(e.to_string()))?
                .decrypt(nonce, ciphertext),
            TicketCipher::Aes128Gcm => Aes128Gcm::new_from_slice(&self.key.bytes)
                .map_err(|e| EnvelopeError::OpenFailed(e.to_string()))?
                .decrypt(nonce, ciphertext),
        };
        result.map_err(|_| EnvelopeError::OpenFailed("authentication failed".to_string()))
    }
}

impl TicketSealer for AeadSealer {
    /// Returns: base64url(nonce (12 bytes) || ciphertext)
    fn seal(&self, plaintext: &[u8]) -> Result<String, EnvelopeError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self.encrypt(&nonce_bytes, plaintext)?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    fn open(&self, sealed: &str) -> Result<Vec<u8>, EnvelopeError> {
        let raw = URL_SAFE_NO_PAD
            .decode(sealed.trim())
            .map_err(|e| EnvelopeError::OpenFailed(format!("invalid encoding: {e}")))?;
        if raw.len() <= NONCE_SIZE {
            return Err(EnvelopeError::OpenFailed(
                "sealed value too short".to_string(),
            ));
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_SIZE);
        self.decrypt(nonce, ciphertext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealer(cipher: TicketCipher) -> AeadSealer {
        AeadSealer::new(SealingKey::generate(cipher))
    }

    #[test]
    fn test_seal_then_open() {
        for cipher in [TicketCipher::Aes256Gcm, TicketCipher::Aes128Gcm] {
            let sealer = sealer(cipher);
            let sealed = sealer.seal(b"ticket-123").unwrap();
            assert_eq!(sealer.open(&sealed).unwrap(), b"ticket-123");
        }
    }

    #[test]
    fn test_sealed_value_is_url_safe_and_random() {
        let sealer = sealer(TicketCipher::Aes256Gcm);
        let a = sealer.seal(b"ticket-123").unwrap();
        let b = sealer.seal(b"ticket-123").unwrap();
        assert_ne!(a, b);
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
    }

    #[test]
    fn test_other_key_cannot_open() {
        let sealed = sealer(TicketCipher::Aes256Gcm).seal(b"ticket").unwrap();
        let result = sealer(TicketCipher::Aes256Gcm).open(&sealed);
        assert!(matches!(result, Err(EnvelopeError::OpenFailed(_))));
    }

    #[test]
    fn test_tampered_value_fails() {
        let sealer = sealer(TicketCipher::Aes256Gcm);
        let sealed = sealer.seal(b"ticket").unwrap();
        let mut raw = URL_SAFE_NO_PAD.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert!(sealer.open(&URL_SAFE_NO_PAD.encode(raw)).is_err());
    }

    #[test]
    fn test_short_and_garbage_values_fail() {
        let sealer = sealer(TicketCipher::Aes128Gcm);
        assert!(sealer.open("").is_err());
        assert!(sealer.open("AAAA").is_err());
        assert!(sealer.open("***").is_err());
    }

    #[test]
    fn test_persisted_key_survives_restart() {
        let encoded = BASE64.encode([9u8; 32]);
        let policy = SealingKeyPolicy::Persisted(encoded);
        let first = AeadSealer::new(SealingKey::from_policy(TicketCipher::Aes256Gcm, &policy).unwrap());
        let second =
            AeadSealer::new(SealingKey::from_policy(TicketCipher::Aes256Gcm, &policy).unwrap());
        let sealed = first.seal(b"tgt").unwrap();
        assert_eq!(second.open(&sealed).unwrap(), b"tgt");
    }

    #[test]
    fn test_key_length_is_checked() {
        let encoded = BASE64.encode([9u8; 16]);
        assert!(SealingKey::from_base64(TicketCipher::Aes256Gcm, &encoded).is_err());
        assert!(SealingKey::from_base64(TicketCipher::Aes128Gcm, &encoded).is_ok());
        assert!(SealingKey::from_base64(TicketCipher::Aes128Gcm, "%%").is_err());
    }

    #[test]
    fn test_cipher_parse() {
        assert_eq!(
            "AES-128-GCM".parse::<TicketCipher>().unwrap(),
            TicketCipher::Aes128Gcm
        );
        assert!("des".parse::<TicketCipher>().is_err());
    }
}
