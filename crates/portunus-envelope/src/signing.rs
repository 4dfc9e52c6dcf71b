//! Protocol message signing and verification.
//!
//! The broker signs with exactly one key of its own and verifies against a
//! [`TrustStore`] of keys registered per authority. An authority may have
//! several valid keys at once for rotation: the base key plus keys
//! registered under the `alias`, `alias1`, `alias2`, ... suffixes.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use portunus_core::AuthorityId;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs1v15::{Signature, SigningKey as RsaSigningKey, VerifyingKey as RsaVerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{Keypair, SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::error::EnvelopeError;

type HmacSha256 = Hmac<Sha256>;

/// Upper bound on numbered rotation aliases probed per authority.
const MAX_NUMBERED_ALIASES: usize = 16;

/// Minimum accepted HMAC secret length in bytes.
const MIN_HMAC_SECRET_LEN: usize = 32;

fn check_hmac_secret(secret: &[u8]) -> Result<(), EnvelopeError> {
    if secret.len() < MIN_HMAC_SECRET_LEN {
        return Err(EnvelopeError::InvalidKey(format!(
            "HMAC secret must be at least {MIN_HMAC_SECRET_LEN} bytes, got {}",
            secret.len()
        )));
    }
    Ok(())
}

/// Signature scheme selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum SignatureAlgorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256.
    #[default]
    #[serde(rename = "rsa-sha256")]
    RsaSha256,
    /// HMAC-SHA256 over a shared secret.
    #[serde(rename = "hmac-sha256")]
    HmacSha256,
}

impl Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SignatureAlgorithm::RsaSha256 => f.write_str("rsa-sha256"),
            SignatureAlgorithm::HmacSha256 => f.write_str("hmac-sha256"),
        }
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rsa-sha256" | "sha256withrsa" | "rs256" => Ok(SignatureAlgorithm::RsaSha256),
            "hmac-sha256" | "hs256" => Ok(SignatureAlgorithm::HmacSha256),
            other => Err(EnvelopeError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// A key used to verify signatures of one authority.
#[derive(Clone)]
pub enum VerificationKey {
    Rsa(RsaVerifyingKey<Sha256>),
    Hmac(Vec<u8>),
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VerificationKey::Rsa(_) => f.write_str("VerificationKey::Rsa(..)"),
            VerificationKey::Hmac(_) => f.write_str("VerificationKey::Hmac(..)"),
        }
    }
}

impl VerificationKey {
    /// Parses a PEM public key (SPKI or PKCS#1).
    pub fn rsa_from_pem(pem: &str) -> Result<Self, EnvelopeError> {
        let public = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| EnvelopeError::InvalidKey(format!("Invalid public key: {e}")))?;
        Ok(VerificationKey::Rsa(RsaVerifyingKey::new(public)))
    }

    /// Wraps a shared HMAC secret.
    pub fn hmac(secret: impl Into<Vec<u8>>) -> Result<Self, EnvelopeError> {
        let secret = secret.into();
        check_hmac_secret(&secret)?;
        Ok(VerificationKey::Hmac(secret))
    }

    fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            VerificationKey::Rsa(_) => SignatureAlgorithm::RsaSha256,
            VerificationKey::Hmac(_) => SignatureAlgorithm::HmacSha256,
        }
    }

    fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        match self {
            VerificationKey::Rsa(key) => match Signature::try_from(signature) {
                Ok(sig) => key.verify(data, &sig).is_ok(),
                Err(_) => false,
            },
            VerificationKey::Hmac(secret) => match HmacSha256::new_from_slice(secret) {
                Ok(mut mac) => {
                    mac.update(data);
                    mac.verify_slice(signature).is_ok()
                }
                Err(_) => false,
            },
        }
    }
}

/// The broker's own signing key.
#[derive(Clone)]
pub enum SigningKey {
    Rsa(Box<RsaSigningKey<Sha256>>),
    Hmac(Vec<u8>),
}

impl SigningKey {
    /// Parses a PEM private key (PKCS#8 or PKCS#1).
    pub fn rsa_from_pem(pem: &str) -> Result<Self, EnvelopeError> {
        let private = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| EnvelopeError::InvalidKey(format!("Invalid private key: {e}")))?;
        Ok(SigningKey::Rsa(Box::new(RsaSigningKey::new(private))))
    }

    /// Wraps a shared HMAC secret.
    pub fn hmac(secret: impl Into<Vec<u8>>) -> Result<Self, EnvelopeError> {
        let secret = secret.into();
        check_hmac_secret(&secret)?;
        Ok(SigningKey::Hmac(secret))
    }

    /// Returns the matching verification key.
    #[must_use]
    pub fn verification_key(&self) -> VerificationKey {
        match self {
            SigningKey::Rsa(key) => VerificationKey::Rsa(key.verifying_key()),
            SigningKey::Hmac(secret) => VerificationKey::Hmac(secret.clone()),
        }
    }

    fn algorithm(&self) -> SignatureAlgorithm {
        match self {
            SigningKey::Rsa(_) => SignatureAlgorithm::RsaSha256,
            SigningKey::Hmac(_) => SignatureAlgorithm::HmacSha256,
        }
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
        match self {
            SigningKey::Rsa(key) => {
                let signature = key
                    .try_sign(data)
                    .map_err(|e| EnvelopeError::SigningFailed(e.to_string()))?;
                Ok(signature.to_vec())
            }
            SigningKey::Hmac(secret) => {
                let mut mac = HmacSha256::new_from_slice(secret)
                    .map_err(|e| EnvelopeError::SigningFailed(e.to_string()))?;
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
        }
    }
}

/// Verification keys per authority, including rotation aliases.
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    keys: HashMap<(AuthorityId, String), VerificationKey>,
}

impl TrustStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the base key of an authority.
    pub fn insert(&mut self, authority: AuthorityId, key: VerificationKey) {
        self.keys.insert((authority, String::new()), key);
    }

    /// Registers a rotation key under an alias suffix (`alias`, `alias1`, ...).
    pub fn insert_alias(
        &mut self,
        authority: AuthorityId,
        alias: impl Into<String>,
        key: VerificationKey,
    ) {
        self.keys.insert((authority, alias.into()), key);
    }

    /// Returns true when at least one key is known for `authority`.
    #[must_use]
    pub fn knows(&self, authority: &AuthorityId) -> bool {
        !self.candidates(authority).is_empty()
    }

    /// Number of registered keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keys to try for `authority`, in lookup order.
    ///
    /// Numbered aliases are probed until the first gap.
    fn candidates(&self, authority: &AuthorityId) -> Vec<&VerificationKey> {
        let lookup = |suffix: &str| self.keys.get(&(authority.clone(), suffix.to_string()));

        let mut found: Vec<&VerificationKey> =
            ["", "alias"].into_iter().filter_map(lookup).collect();

        for index in 1..=MAX_NUMBERED_ALIASES {
            match lookup(&format!("alias{index}")) {
                Some(key) => found.push(key),
                None => break,
            }
        }
        found
    }
}

/// Signing contract shared by every protocol participant.
pub trait MessageSigner: Send + Sync {
    /// The authority id this signer signs as.
    fn authority(&self) -> &AuthorityId;

    /// Signs `data` and returns the base64 signature.
    fn sign(&self, data: &[u8]) -> Result<String, EnvelopeError>;

    /// Verifies a base64 signature of `authority` over `data`.
    ///
    /// Fails closed: unknown authorities, undecodable signatures and
    /// algorithm mismatches all return `false`.
    fn verify(&self, authority: &AuthorityId, data: &[u8], signature: &str) -> bool;
}

/// [`MessageSigner`] backed by one private key and a trust store.
#[derive(Clone)]
pub struct KeySigner {
    authority: AuthorityId,
    algorithm: SignatureAlgorithm,
    key: SigningKey,
    trust: TrustStore,
}

impl KeySigner {
    /// Creates a signer. The signer's own verification key is added to the
    /// trust store so locally produced signatures (form counters, redirects)
    /// can be verified on the way back in.
    pub fn new(
        authority: AuthorityId,
        algorithm: SignatureAlgorithm,
        key: SigningKey,
        mut trust: TrustStore,
    ) -> Result<Self, EnvelopeError> {
        if key.algorithm() != algorithm {
            return Err(EnvelopeError::UnsupportedAlgorithm(format!(
                "configured {algorithm} but the signing key is {}",
                key.algorithm()
            )));
        }
        trust.insert(authority.clone(), key.verification_key());
        Ok(Self {
            authority,
            algorithm,
            key,
            trust,
        })
    }

    #[must_use]
    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    #[must_use]
    pub fn trust_store(&self) -> &TrustStore {
        &self.trust
    }
}

impl MessageSigner for KeySigner {
    fn authority(&self) -> &AuthorityId {
        &self.authority
    }

    fn sign(&self, data: &[u8]) -> Result<String, EnvelopeError> {
        self.key.sign(data).map(|raw| BASE64.encode(raw))
    }

    fn verify(&self, authority: &AuthorityId, data: &[u8], signature: &str) -> bool {
        let Ok(raw) = BASE64.decode(signature.trim()) else {
            tracing::debug!(authority = %authority, "Signature is not valid base64");
            return false;
        };

        let candidates = self.trust.candidates(authority);
        if candidates.is_empty() {
            tracing::warn!(authority = %authority, "No verification key for authority");
            return false;
        }

        candidates
            .into_iter()
            .filter(|key| key.algorithm() == self.algorithm)
            .any(|key| key.verify(data, &raw))
    }
}

/// Generate an RSA key pair as (PKCS#8 private PEM, SPKI public PEM).
pub fn generate_rsa_key_pair(bits: usize) -> Result<(String, String), EnvelopeError> {
    use rand::rngs::OsRng;

    let private = RsaPrivateKey::new(&mut OsRng, bits)
        .map_err(|e| EnvelopeError::InvalidKey(format!("Key generation failed: {e}")))?;
    let public = private.to_public_key();

    let private_pem = private
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| EnvelopeError::InvalidKey(e.to_string()))?
        .to_string();
    let public_pem = public
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| EnvelopeError::InvalidKey(e.to_string()))?;

    Ok((private_pem, public_pem))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::OnceLock;

    /// Two key pairs shared by all tests; RSA generation is slow in debug builds.
    pub(crate) fn test_keys() -> &'static [(String, String); 2] {
        static KEYS: OnceLock<[(String, String); 2]> = OnceLock::new();
        KEYS.get_or_init(|| {
            [
                generate_rsa_key_pair(1024).unwrap(),
                generate_rsa_key_pair(1024).unwrap(),
            ]
        })
    }

    fn rsa_signer(authority: &str, key_index: usize, trust: TrustStore) -> KeySigner {
        let key = SigningKey::rsa_from_pem(&test_keys()[key_index].0).unwrap();
        KeySigner::new(
            AuthorityId::new(authority),
            SignatureAlgorithm::RsaSha256,
            key,
            trust,
        )
        .unwrap()
    }

    #[test]
    fn test_sign_and_verify_own_signature() {
        let signer = rsa_signer("broker-a", 0, TrustStore::new());
        let signature = signer.sign(b"broker-aapp1").unwrap();
        assert!(signer.verify(&AuthorityId::new("broker-a"), b"broker-aapp1", &signature));
    }

    #[test]
    fn test_loaded_rsa_key_signs_repeatedly_against_its_public_pem() {
        let key = SigningKey::rsa_from_pem(&test_keys()[0].0).unwrap();
        let public = VerificationKey::rsa_from_pem(&test_keys()[0].1).unwrap();

        let first = key.sign(b"1:token").unwrap();
        let second = key.sign(b"1:token").unwrap();
        assert_eq!(first, second);
        assert!(public.verify(b"1:token", &first));
        assert!(key.verification_key().verify(b"1:token", &second));
    }

    #[test]
    fn test_tampered_data_fails() {
        let signer = rsa_signer("broker-a", 0, TrustStore::new());
        let signature = signer.sign(b"1:token").unwrap();
        assert!(!signer.verify(&AuthorityId::new("broker-a"), b"2:token", &signature));
    }

    #[test]
    fn test_unknown_authority_fails_closed() {
        let signer = rsa_signer("broker-a", 0, TrustStore::new());
        let signature = signer.sign(b"data").unwrap();
        assert!(!signer.verify(&AuthorityId::new("nobody"), b"data", &signature));
    }

    #[test]
    fn test_garbage_signature_fails_closed() {
        let signer = rsa_signer("broker-a", 0, TrustStore::new());
        assert!(!signer.verify(&AuthorityId::new("broker-a"), b"data", "!!not-base64!!"));
        assert!(!signer.verify(&AuthorityId::new("broker-a"), b"data", "AAAA"));
    }

    #[test]
    fn test_peer_signature_via_trust_store() {
        let peer = rsa_signer("broker-b", 1, TrustStore::new());
        let mut trust = TrustStore::new();
        trust.insert(
            AuthorityId::new("broker-b"),
            VerificationKey::rsa_from_pem(&test_keys()[1].1).unwrap(),
        );
        let local = rsa_signer("broker-a", 0, trust);

        let signature = peer.sign(b"payload").unwrap();
        assert!(local.verify(&AuthorityId::new("broker-b"), b"payload", &signature));
    }

    #[test]
    fn test_rotation_alias_is_accepted() {
        let rotated = rsa_signer("app1", 1, TrustStore::new());
        let mut trust = TrustStore::new();
        trust.insert(
            AuthorityId::new("app1"),
            VerificationKey::rsa_from_pem(&test_keys()[0].1).unwrap(),
        );
        trust.insert_alias(
            AuthorityId::new("app1"),
            "alias1",
            VerificationKey::rsa_from_pem(&test_keys()[1].1).unwrap(),
        );
        let local = rsa_signer("broker-a", 0, trust);

        let signature = rotated.sign(b"payload").unwrap();
        assert!(local.verify(&AuthorityId::new("app1"), b"payload", &signature));
    }

    #[test]
    fn test_numbered_alias_after_gap_is_ignored() {
        let rotated = rsa_signer("app1", 1, TrustStore::new());
        let mut trust = TrustStore::new();
        trust.insert(
            AuthorityId::new("app1"),
            VerificationKey::rsa_from_pem(&test_keys()[0].1).unwrap(),
        );
        trust.insert_alias(
            AuthorityId::new("app1"),
            "alias3",
            VerificationKey::rsa_from_pem(&test_keys()[1].1).unwrap(),
        );
        let local = rsa_signer("broker-a", 0, trust);

        let signature = rotated.sign(b"payload").unwrap();
        assert!(!local.verify(&AuthorityId::new("app1"), b"payload", &signature));
    }

    #[test]
    fn test_hmac_signing() {
        let secret = vec![7u8; 32];
        let signer = KeySigner::new(
            AuthorityId::new("broker-a"),
            SignatureAlgorithm::HmacSha256,
            SigningKey::hmac(secret).unwrap(),
            TrustStore::new(),
        )
        .unwrap();
        let signature = signer.sign(b"data").unwrap();
        assert!(signer.verify(&AuthorityId::new("broker-a"), b"data", &signature));
        assert!(!signer.verify(&AuthorityId::new("broker-a"), b"datb", &signature));
    }

    #[test]
    fn test_hmac_secret_too_short() {
        assert!(SigningKey::hmac(vec![1u8; 8]).is_err());
    }

    #[test]
    fn test_algorithm_mismatch_is_rejected() {
        let key = SigningKey::rsa_from_pem(&test_keys()[0].0).unwrap();
        let result = KeySigner::new(
            AuthorityId::new("broker-a"),
            SignatureAlgorithm::HmacSha256,
            key,
            TrustStore::new(),
        );
        assert!(matches!(
            result.err(),
            Some(EnvelopeError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!(
            "RSA-SHA256".parse::<SignatureAlgorithm>().unwrap(),
            SignatureAlgorithm::RsaSha256
        );
        assert_eq!(
            "hs256".parse::<SignatureAlgorithm>().unwrap(),
            SignatureAlgorithm::HmacSha256
        );
        assert!("md5".parse::<SignatureAlgorithm>().is_err());
    }

    #[test]
    fn test_invalid_pem() {
        assert!(SigningKey::rsa_from_pem("not a key").is_err());
        assert!(VerificationKey::rsa_from_pem("not a key").is_err());
    }
}
