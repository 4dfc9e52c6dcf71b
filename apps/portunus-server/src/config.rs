//! Server configuration loaded from environment variables.
//!
//! Loading fails fast: a required variable that is missing or malformed
//! stops startup with a message naming the variable. Per-party settings
//! (applications, AuthSPs, peers, resource groups, trusted keys) live in the
//! registry file named by `PORTUNUS_REGISTRY_FILE`, see [`crate::bootstrap`].

use portunus_envelope::{SealingKeyPolicy, SignatureAlgorithm, TicketCipher};
use portunus_resources::DEFAULT_REFRESH_INTERVAL;
use portunus_store::{DEFAULT_SESSION_TTL_SECONDS, DEFAULT_TICKET_TTL_SECONDS};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::logging::DEFAULT_FILTER;

const DEFAULT_BACKCHANNEL_TIMEOUT_SECS: u64 = 5;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

/// Application environment mode.
///
/// Production turns the security warnings emitted at startup into reasons
/// to look twice; it does not change protocol behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Production,
}

impl AppEnvironment {
    /// Parse from the `APP_ENV` value. Unrecognized values mean development.
    pub fn from_env_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => {
                tracing::warn!(
                    value = other,
                    "Unrecognized APP_ENV value, defaulting to Development"
                );
                Self::Development
            }
        }
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        *self == Self::Production
    }
}

impl std::fmt::Display for AppEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

impl ConfigError {
    fn invalid(var: &str, message: impl std::fmt::Display) -> Self {
        ConfigError::InvalidValue {
            var: var.to_string(),
            message: message.to_string(),
        }
    }
}

/// Broker server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub app_env: AppEnvironment,
    pub host: String,
    pub port: u16,
    pub rust_log: String,

    /// The `a-select-server` id of this broker.
    pub server_id: String,
    /// Organization reported for users authenticated locally.
    pub organization: String,
    /// Externally visible base URL.
    pub public_url: String,

    pub signature_algorithm: SignatureAlgorithm,
    /// PEM private key for RSA, base64 secret for HMAC.
    pub signing_key: String,
    pub ticket_cipher: TicketCipher,
    pub ticket_key_policy: SealingKeyPolicy,

    pub session_ttl_seconds: i64,
    pub ticket_ttl_seconds: i64,
    pub single_sign_on: bool,
    pub sign_requests: bool,

    pub backchannel_timeout: Duration,
    pub resource_refresh: Duration,
    pub cleanup_interval: Duration,

    pub registry_file: PathBuf,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let require = |name: &str| get(name).ok_or_else(|| ConfigError::MissingVar(name.into()));

        let app_env =
            AppEnvironment::from_env_str(&get("APP_ENV").unwrap_or_else(|| "development".into()));
        let host = get("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse_or("PORT", get("PORT"), 8080u16)?;
        let rust_log = get("RUST_LOG").unwrap_or_else(|| DEFAULT_FILTER.to_string());

        let server_id = require("PORTUNUS_SERVER_ID")?;
        let organization = require("PORTUNUS_ORGANIZATION")?;
        let public_url = require("PORTUNUS_PUBLIC_URL")?;
        check_public_url(&public_url)?;

        let signature_algorithm = parse_or(
            "PORTUNUS_SIGNATURE_ALGORITHM",
            get("PORTUNUS_SIGNATURE_ALGORITHM"),
            SignatureAlgorithm::default(),
        )?;
        let signing_key = match (get("PORTUNUS_SIGNING_KEY"), get("PORTUNUS_SIGNING_KEY_FILE")) {
            (Some(inline), _) => inline,
            (None, Some(path)) => std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::invalid("PORTUNUS_SIGNING_KEY_FILE", e))?,
            (None, None) => return Err(ConfigError::MissingVar("PORTUNUS_SIGNING_KEY".into())),
        };

        let ticket_cipher = parse_or(
            "PORTUNUS_TICKET_CIPHER",
            get("PORTUNUS_TICKET_CIPHER"),
            TicketCipher::default(),
        )?;
        let ticket_key_policy = match get("PORTUNUS_TICKET_KEY_POLICY")
            .unwrap_or_else(|| "ephemeral".to_string())
            .to_lowercase()
            .as_str()
        {
            "ephemeral" => SealingKeyPolicy::Ephemeral,
            "persisted" => SealingKeyPolicy::Persisted(require("PORTUNUS_TICKET_KEY")?),
            other => {
                return Err(ConfigError::invalid(
                    "PORTUNUS_TICKET_KEY_POLICY",
                    format!("expected ephemeral or persisted, got {other}"),
                ))
            }
        };

        let session_ttl_seconds = positive(
            "PORTUNUS_SESSION_TTL_SECS",
            parse_or(
                "PORTUNUS_SESSION_TTL_SECS",
                get("PORTUNUS_SESSION_TTL_SECS"),
                DEFAULT_SESSION_TTL_SECONDS,
            )?,
        )?;
        let ticket_ttl_seconds = positive(
            "PORTUNUS_TICKET_TTL_SECS",
            parse_or(
                "PORTUNUS_TICKET_TTL_SECS",
                get("PORTUNUS_TICKET_TTL_SECS"),
                DEFAULT_TICKET_TTL_SECONDS,
            )?,
        )?;
        let single_sign_on =
            parse_bool("PORTUNUS_SINGLE_SIGN_ON", get("PORTUNUS_SINGLE_SIGN_ON"), true)?;
        let sign_requests =
            parse_bool("PORTUNUS_SIGN_REQUESTS", get("PORTUNUS_SIGN_REQUESTS"), true)?;

        let backchannel_timeout = Duration::from_secs(parse_or(
            "PORTUNUS_BACKCHANNEL_TIMEOUT_SECS",
            get("PORTUNUS_BACKCHANNEL_TIMEOUT_SECS"),
            DEFAULT_BACKCHANNEL_TIMEOUT_SECS,
        )?);
        let resource_refresh = Duration::from_secs(parse_or(
            "PORTUNUS_RESOURCE_REFRESH_SECS",
            get("PORTUNUS_RESOURCE_REFRESH_SECS"),
            DEFAULT_REFRESH_INTERVAL.as_secs(),
        )?);
        let cleanup_interval = Duration::from_secs(parse_or(
            "PORTUNUS_CLEANUP_INTERVAL_SECS",
            get("PORTUNUS_CLEANUP_INTERVAL_SECS"),
            DEFAULT_CLEANUP_INTERVAL_SECS,
        )?);
        if cleanup_interval.is_zero() {
            return Err(ConfigError::invalid(
                "PORTUNUS_CLEANUP_INTERVAL_SECS",
                "must be greater than zero",
            ));
        }

        let registry_file = PathBuf::from(require("PORTUNUS_REGISTRY_FILE")?);

        Ok(Self {
            app_env,
            host,
            port,
            rust_log,
            server_id,
            organization,
            public_url,
            signature_algorithm,
            signing_key,
            ticket_cipher,
            ticket_key_policy,
            session_ttl_seconds,
            ticket_ttl_seconds,
            single_sign_on,
            sign_requests,
            backchannel_timeout,
            resource_refresh,
            cleanup_interval,
            registry_file,
        })
    }

    /// Settings that are legal but weaken the deployment.
    #[must_use]
    pub fn security_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.ticket_key_policy == SealingKeyPolicy::Ephemeral && self.app_env.is_production() {
            warnings.push(
                "Ticket sealing key is ephemeral; outstanding tickets are lost on restart"
                    .to_string(),
            );
        }
        if !self.public_url.starts_with("https://") {
            warnings.push(format!(
                "Public URL {} is not https; cookies are sent without the Secure flag",
                self.public_url
            ));
        }
        if !self.sign_requests {
            warnings.push("Back-channel requests to peer brokers are not signed".to_string());
        }
        warnings
    }
}

fn parse_or<T>(var: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value.trim().parse().map_err(|e| ConfigError::invalid(var, e)),
        None => Ok(default),
    }
}

fn parse_bool(var: &str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match raw.as_deref().map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            other => Err(ConfigError::invalid(var, format!("expected a boolean, got {other}"))),
        },
    }
}

fn positive(var: &str, value: i64) -> Result<i64, ConfigError> {
    if value <= 0 {
        return Err(ConfigError::invalid(var, "must be greater than zero"));
    }
    Ok(value)
}

fn check_public_url(public_url: &str) -> Result<(), ConfigError> {
    if public_url.starts_with("https://") || public_url.starts_with("http://") {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            "PORTUNUS_PUBLIC_URL",
            "must be an absolute http(s) URL",
        ))
    }
}
