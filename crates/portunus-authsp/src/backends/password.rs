//! Reference password store backed by Argon2 hashes.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use portunus_core::AttributeBag;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::backend::{AuthspBackend, BackendVerdict, VerifyRequest, PASSWORD_FIELD};
use crate::error::BackendError;

/// One account of the password store.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordEntry {
    pub uid: String,
    /// PHC-formatted Argon2 hash.
    pub hash: String,
    #[serde(default)]
    pub attributes: AttributeBag,
}

#[derive(Debug, Clone)]
pub struct PasswordBackend {
    users: Arc<HashMap<String, PasswordEntry>>,
}

impl PasswordBackend {
    pub fn new(entries: Vec<PasswordEntry>) -> Result<Self, BackendError> {
        let mut users = HashMap::with_capacity(entries.len());
        for entry in entries {
            PasswordHash::new(&entry.hash).map_err(|e| {
                BackendError::Configuration(format!("Invalid hash for {}: {e}", entry.uid))
            })?;
            users.insert(entry.uid.clone(), entry);
        }
        Ok(Self {
            users: Arc::new(users),
        })
    }
}

/// Hash a password with Argon2id default parameters.
pub fn hash_password(password: &str) -> Result<String, BackendError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| BackendError::Configuration(format!("Hashing failed: {e}")))
}

fn verify_hash(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[async_trait]
impl AuthspBackend for PasswordBackend {
    fn kind(&self) -> &'static str {
        "password"
    }

    async fn verify(&self, request: &VerifyRequest) -> Result<BackendVerdict, BackendError> {
        let Some(entry) = self.users.get(&request.uid).cloned() else {
            debug!(authsp = %request.authsp, "Unknown user in password store");
            return Ok(BackendVerdict::Fail);
        };
        let password = request.field(PASSWORD_FIELD).unwrap_or_default().to_string();
        if password.is_empty() {
            return Ok(BackendVerdict::Fail);
        }

        let hash = entry.hash.clone();
        let matches = tokio::task::spawn_blocking(move || verify_hash(&password, &hash))
            .await
            .map_err(|e| BackendError::Unavailable(format!("Verification task failed: {e}")))?;

        if !matches {
            return Ok(BackendVerdict::Fail);
        }
        if entry.attributes.is_empty() {
            Ok(BackendVerdict::SuccessNoContent)
        } else {
            Ok(BackendVerdict::Success(entry.attributes))
        }
    }
}
