//! Availability probes.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{ResourceError, ResourceResult};
use crate::group::Resource;

/// Default timeout of a TCP availability probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Decides whether a resource can currently accept requests.
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    async fn is_available(&self, resource: &Resource) -> bool;
}

/// Probes a resource by opening a TCP connection to its host and port.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

#[async_trait]
impl ResourceProbe for TcpProbe {
    async fn is_available(&self, resource: &Resource) -> bool {
        let addr = match socket_address(&resource.url) {
            Ok(addr) => addr,
            Err(e) => {
                debug!(resource = %resource.id, error = %e, "Resource URL not probeable");
                return false;
            }
        };
        match tokio::time::timeout(self.timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(resource = %resource.id, addr = %addr, error = %e, "Probe connect failed");
                false
            }
            Err(_) => {
                debug!(resource = %resource.id, addr = %addr, "Probe timed out");
                false
            }
        }
    }
}

/// Treats every resource as available. Failures are then learned only
/// from reports by callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAvailable;

#[async_trait]
impl ResourceProbe for AlwaysAvailable {
    async fn is_available(&self, _resource: &Resource) -> bool {
        true
    }
}

/// Returns `host:port` for a resource URL, using the scheme's default port.
pub fn socket_address(raw: &str) -> ResourceResult<String> {
    let invalid = |message: &str| ResourceError::InvalidUrl {
        url: raw.to_string(),
        message: message.to_string(),
    };
    let parsed = url::Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    let host = parsed.host_str().ok_or_else(|| invalid("missing host"))?;
    let port = parsed
        .port_or_known_default()
        .or_else(|| match parsed.scheme() {
            "ldap" => Some(389),
            "ldaps" => Some(636),
            _ => None,
        })
        .ok_or_else(|| invalid("missing port"))?;
    Ok(format!("{host}:{port}"))
}
