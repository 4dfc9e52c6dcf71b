//! Ticket-Granting Ticket storage.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use portunus_core::{
    AppId, AttributeBag, AuthLevel, AuthspId, OrganizationId, ResultCode, Rid, TicketId,
};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::versioned::{Expiring, Versioned, VersionedMap, MAX_MODIFY_ATTEMPTS};

/// Default ticket lifetime (8 hours).
pub const DEFAULT_TICKET_TTL_SECONDS: i64 = 8 * 3600;

/// Lifetime of an error ticket. It only has to survive one redirect.
pub const ERROR_TICKET_TTL_SECONDS: i64 = 120;

/// Party a ticket was issued to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Requester {
    Application(AppId),
    Organization(OrganizationId),
}

/// The outcome of a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub uid: String,
    pub organization: OrganizationId,
    pub authsp: AuthspId,
    pub authsp_level: AuthLevel,
    pub app_level: AuthLevel,
    pub sso_groups: Vec<String>,
    pub attributes: AttributeBag,
}

/// What the ticket stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TicketKind {
    Granted(Grant),
    /// Delayed error propagation: the requester learns `result_code` through
    /// `verify_credentials`.
    Error { result_code: ResultCode },
}

/// A persisted ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    /// Rid of the attempt the ticket was last issued for.
    pub rid: Rid,
    pub requester: Requester,
    pub kind: TicketKind,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Ticket {
    /// Creates a granted ticket valid for `ttl_seconds`.
    #[must_use]
    pub fn granted(rid: Rid, requester: Requester, grant: Grant, ttl_seconds: i64) -> Self {
        let now = Utc::now();
        Self {
            id: TicketId::generate(),
            rid,
            requester,
            kind: TicketKind::Granted(grant),
            issued_at: now,
            expires_at: now + Duration::seconds(ttl_seconds),
        }
    }

    /// Creates a short-lived error ticket.
    #[must_use]
    pub fn error(rid: Rid, requester: Requester, result_code: ResultCode) -> Self {
        let now = Utc::now();
        Self {
            id: TicketId::generate(),
            rid,
            requester,
            kind: TicketKind::Error { result_code },
            issued_at: now,
            expires_at: now + Duration::seconds(ERROR_TICKET_TTL_SECONDS),
        }
    }

    #[must_use]
    pub fn grant(&self) -> Option<&Grant> {
        match &self.kind {
            TicketKind::Granted(grant) => Some(grant),
            TicketKind::Error { .. } => None,
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self.kind, TicketKind::Error { .. })
    }

    /// Single-sign-on renewal: re-bind to a new attempt, extend the lifetime
    /// and merge newly released attributes.
    pub fn renew(&mut self, rid: Rid, ttl_seconds: i64, attributes: Option<&AttributeBag>) {
        self.rid = rid;
        self.expires_at = Utc::now() + Duration::seconds(ttl_seconds);
        if let (TicketKind::Granted(grant), Some(extra)) = (&mut self.kind, attributes) {
            grant.attributes.union(extra);
        }
    }

    /// Seconds since epoch of the expiration, as sent on the wire.
    #[must_use]
    pub fn expiration_timestamp(&self) -> i64 {
        self.expires_at.timestamp()
    }
}

impl Expiring for Ticket {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// Ticket store contract.
#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn insert(&self, ticket: Ticket) -> StoreResult<()>;

    /// Unknown ids are `NotFound`; expired tickets are removed and `Expired`.
    async fn get(&self, id: &TicketId) -> StoreResult<Versioned<Ticket>>;

    async fn update(&self, id: &TicketId, expected_version: u64, ticket: Ticket)
        -> StoreResult<u64>;

    async fn remove(&self, id: &TicketId) -> StoreResult<Ticket>;

    async fn cleanup_expired(&self) -> StoreResult<u64>;

    async fn count(&self) -> usize;
}

/// Reads the ticket, applies `f` and writes it back, retrying on conflicts.
pub async fn modify_ticket<F, T>(
    store: &dyn TicketStore,
    id: &TicketId,
    mut f: F,
) -> StoreResult<(Ticket, T)>
where
    F: FnMut(&mut Ticket) -> T + Send,
    T: Send,
{
    for _ in 0..MAX_MODIFY_ATTEMPTS {
        let Versioned { version, mut value } = store.get(id).await?;
        let output = f(&mut value);
        match store.update(id, version, value.clone()).await {
            Ok(_) => return Ok((value, output)),
            Err(StoreError::Conflict { .. }) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(StoreError::Contended("ticket".to_string()))
}

/// In-memory ticket store, sharded per ticket id.
#[derive(Debug, Default)]
pub struct InMemoryTicketStore {
    tickets: VersionedMap<TicketId, Ticket>,
}

impl InMemoryTicketStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TicketStore for InMemoryTicketStore {
    async fn insert(&self, ticket: Ticket) -> StoreResult<()> {
        self.tickets.insert_new(ticket.id.clone(), ticket)
    }

    async fn get(&self, id: &TicketId) -> StoreResult<Versioned<Ticket>> {
        self.tickets.get(id)
    }

    async fn update(
        &self,
        id: &TicketId,
        expected_version: u64,
        ticket: Ticket,
    ) -> StoreResult<u64> {
        self.tickets.compare_and_swap(id, expected_version, ticket)
    }

    async fn remove(&self, id: &TicketId) -> StoreResult<Ticket> {
        self.tickets.remove(id)
    }

    async fn cleanup_expired(&self) -> StoreResult<u64> {
        let deleted = self.tickets.retain_unexpired();
        if deleted > 0 {
            tracing::debug!(deleted = deleted, "Cleaned up expired tickets");
        }
        Ok(deleted)
    }

    async fn count(&self) -> usize {
        self.tickets.len()
    }
}
