//! Session storage for in-flight authentication attempts.
//!
//! A session lives from the moment an application or peer broker asks for an
//! authentication until a ticket is issued or the attempt fails for good.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use portunus_core::{
    AppId, AttributeBag, AuthLevel, AuthspId, OrganizationId, ResultCode, Rid, TicketId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{StoreError, StoreResult};
use crate::versioned::{Expiring, Versioned, VersionedMap, MAX_MODIFY_ATTEMPTS};

/// Default session lifetime (10 minutes).
pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 600;

/// Position of the session in the AuthSP handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeState {
    /// No AuthSP has been picked yet, or the next one has not been prompted.
    #[default]
    Init,
    /// A credential form has been issued.
    AwaitingCredentials,
    /// A submission is being checked by the backend.
    Verifying,
    /// The backend asked for another round.
    Challenge,
    /// An AuthSP succeeded and the next one in the chain is about to start.
    Chaining,
    /// Delegated to a peer broker, waiting for the browser to come back.
    Delegated,
    /// Every required AuthSP succeeded.
    Success,
    /// Terminal failure; `result_code` says why.
    Failed,
}

/// Per-AuthSP handshake bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthspSlot {
    /// Number of the attempt the current form belongs to, starting at 1.
    pub retry_counter: u32,
    /// Anti-replay token of the current form.
    pub form_token: String,
    /// Opaque handle of a multi-round backend exchange.
    pub sub_session: Option<String>,
    /// Prompt shown for the current challenge round.
    pub challenge: Option<String>,
    /// Subject the current challenge was issued for.
    pub uid: Option<String>,
}

impl AuthspSlot {
    /// A fresh slot for the first attempt.
    #[must_use]
    pub fn first(form_token: String) -> Self {
        Self {
            retry_counter: 1,
            form_token,
            sub_session: None,
            challenge: None,
            uid: None,
        }
    }

    /// Wire form of the counter: `<n>:<token>`.
    #[must_use]
    pub fn wire_counter(&self) -> String {
        format!("{}:{}", self.retry_counter, self.form_token)
    }

    /// Drops all challenge state.
    pub fn clear_challenge(&mut self) {
        self.sub_session = None;
        self.challenge = None;
        self.uid = None;
    }
}

/// Who asked for the authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionOrigin {
    /// A local application.
    Application { app_id: AppId, return_url: String },
    /// A peer broker that delegated the authentication to us.
    Peer {
        organization: OrganizationId,
        /// Where the browser goes once we are done (`as_url`).
        return_url: String,
        /// The peer's own request id (`local_rid` on its side).
        remote_rid: String,
    },
}

/// Correlation with a peer broker this session delegated to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationRecord {
    pub remote_organization: OrganizationId,
    /// Filled in once the browser comes back with the peer's rid.
    pub remote_rid: Option<String>,
}

/// An authentication that succeeded and waits for ticket issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authenticated {
    pub uid: String,
    pub organization: OrganizationId,
    pub authsp: AuthspId,
    pub level: AuthLevel,
    pub attributes: AttributeBag,
}

/// State of one authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub origin: SessionOrigin,
    pub required_level: AuthLevel,
    pub forced_uid: Option<String>,
    pub forced_logon: bool,
    /// AuthSP currently driving the handshake.
    pub authsp: Option<AuthspId>,
    pub slots: BTreeMap<AuthspId, AuthspSlot>,
    pub country: Option<String>,
    pub language: Option<String>,
    pub sso_groups: Vec<String>,
    pub state: HandshakeState,
    /// AuthSPs that already succeeded, in order.
    pub chain: Vec<AuthspId>,
    pub delegation: Option<DelegationRecord>,
    pub authenticated: Option<Authenticated>,
    /// Ticket presented by the browser; renewed instead of issuing a new one.
    pub existing_ticket: Option<TicketId>,
    pub result_code: Option<ResultCode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionState {
    /// Creates a fresh session with the default lifetime.
    #[must_use]
    pub fn new(origin: SessionOrigin, required_level: AuthLevel) -> Self {
        Self::with_ttl(origin, required_level, DEFAULT_SESSION_TTL_SECONDS)
    }

    /// Creates a fresh session with a custom lifetime.
    #[must_use]
    pub fn with_ttl(origin: SessionOrigin, required_level: AuthLevel, ttl_seconds: i64) -> Self {
        let now = Utc::now();
        Self {
            origin,
            required_level,
            forced_uid: None,
            forced_logon: false,
            authsp: None,
            slots: BTreeMap::new(),
            country: None,
            language: None,
            sso_groups: Vec::new(),
            state: HandshakeState::Init,
            chain: Vec::new(),
            delegation: None,
            authenticated: None,
            existing_ticket: None,
            result_code: None,
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::seconds(ttl_seconds),
        }
    }

    /// Seconds since the session was created.
    #[must_use]
    pub fn elapsed_seconds(&self) -> i64 {
        (Utc::now() - self.created_at).num_seconds()
    }

    /// The requesting application, if the origin is local.
    #[must_use]
    pub fn app_id(&self) -> Option<&AppId> {
        match &self.origin {
            SessionOrigin::Application { app_id, .. } => Some(app_id),
            SessionOrigin::Peer { .. } => None,
        }
    }

    /// Id of the requester as it appears in signed form data: the application
    /// id, or the organization id of a delegating peer.
    #[must_use]
    pub fn requester_key(&self) -> &str {
        match &self.origin {
            SessionOrigin::Application { app_id, .. } => app_id.as_str(),
            SessionOrigin::Peer { organization, .. } => organization.as_str(),
        }
    }

    /// Marks the session as terminally failed.
    pub fn fail(&mut self, code: ResultCode) {
        self.state = HandshakeState::Failed;
        self.result_code = Some(code);
    }
}

impl Expiring for SessionState {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// Session store contract.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Stores a new session under a freshly generated rid.
    async fn create(&self, state: SessionState) -> StoreResult<Rid>;

    /// Returns an owned snapshot of the session.
    ///
    /// Unknown and expired rids are errors; both map to `SESSION_EXPIRED`.
    async fn get(&self, rid: &Rid) -> StoreResult<Versioned<SessionState>>;

    /// Writes `state` back if the stored version is still `expected_version`.
    ///
    /// Returns the new version.
    async fn update(
        &self,
        rid: &Rid,
        expected_version: u64,
        state: SessionState,
    ) -> StoreResult<u64>;

    /// Removes the session and returns its last state. A second delete of the
    /// same rid is `NotFound`.
    async fn delete(&self, rid: &Rid) -> StoreResult<SessionState>;

    /// Removes expired sessions and returns how many were dropped.
    async fn cleanup_expired(&self) -> StoreResult<u64>;

    /// Number of stored sessions.
    async fn count(&self) -> usize;
}

/// Reads the session, applies `f` and writes it back, retrying on conflicts.
///
/// Returns the state as written together with the closure's result.
pub async fn modify_session<F, T>(
    store: &dyn SessionStore,
    rid: &Rid,
    mut f: F,
) -> StoreResult<(SessionState, T)>
where
    F: FnMut(&mut SessionState) -> T + Send,
    T: Send,
{
    for _ in 0..MAX_MODIFY_ATTEMPTS {
        let Versioned { version, mut value } = store.get(rid).await?;
        let output = f(&mut value);
        value.updated_at = Utc::now();
        match store.update(rid, version, value.clone()).await {
            Ok(_) => return Ok((value, output)),
            Err(StoreError::Conflict { .. }) => {
                tracing::debug!(rid = %rid, "Session write conflict, retrying");
            }
            Err(e) => return Err(e),
        }
    }
    Err(StoreError::Contended(rid.to_string()))
}

/// In-memory session store, sharded per rid.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: VersionedMap<Rid, SessionState>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, state: SessionState) -> StoreResult<Rid> {
        let rid = Rid::generate();
        self.sessions.insert_new(rid.clone(), state)?;
        Ok(rid)
    }

    async fn get(&self, rid: &Rid) -> StoreResult<Versioned<SessionState>> {
        self.sessions.get(rid)
    }

    async fn update(
        &self,
        rid: &Rid,
        expected_version: u64,
        state: SessionState,
    ) -> StoreResult<u64> {
        self.sessions.compare_and_swap(rid, expected_version, state)
    }

    async fn delete(&self, rid: &Rid) -> StoreResult<SessionState> {
        self.sessions.remove(rid)
    }

    async fn cleanup_expired(&self) -> StoreResult<u64> {
        let deleted = self.sessions.retain_unexpired();
        if deleted > 0 {
            tracing::debug!(deleted = deleted, "Cleaned up expired sessions");
        }
        Ok(deleted)
    }

    async fn count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn origin() -> SessionOrigin {
        SessionOrigin::Application {
            app_id: AppId::new("app1"),
            return_url: "https://app.example.org/return".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemorySessionStore::new();
        let rid = store
            .create(SessionState::new(origin(), AuthLevel(10)))
            .await
            .unwrap();
        let snapshot = store.get(&rid).await.unwrap();
        assert_eq!(snapshot.value.required_level, AuthLevel(10));
        assert_eq!(snapshot.value.state, HandshakeState::Init);
        assert_eq!(snapshot.value.app_id(), Some(&AppId::new("app1")));
    }

    #[tokio::test]
    async fn test_unknown_rid_is_session_expired() {
        let store = InMemorySessionStore::new();
        let err = store.get(&Rid::generate()).await.unwrap_err();
        assert_eq!(err.session_result_code(), ResultCode::SessionExpired);
    }

    #[tokio::test]
    async fn test_expired_session_is_rejected() {
        let store = InMemorySessionStore::new();
        let rid = store
            .create(SessionState::with_ttl(origin(), AuthLevel(10), -1))
            .await
            .unwrap();
        assert!(matches!(
            store.get(&rid).await,
            Err(StoreError::Expired(_))
        ));
    }

    #[tokio::test]
    async fn test_rids_are_unique() {
        let store = InMemorySessionStore::new();
        let a = store
            .create(SessionState::new(origin(), AuthLevel(10)))
            .await
            .unwrap();
        let b = store
            .create(SessionState::new(origin(), AuthLevel(10)))
            .await
            .unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_delete_exactly_once() {
        let store = InMemorySessionStore::new();
        let rid = store
            .create(SessionState::new(origin(), AuthLevel(10)))
            .await
            .unwrap();
        assert!(store.delete(&rid).await.is_ok());
        assert!(matches!(
            store.delete(&rid).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_modify_loses_no_update() {
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let rid = store
            .create(SessionState::new(origin(), AuthLevel(10)))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..4 {
            let store = store.clone();
            let rid = rid.clone();
            handles.push(tokio::spawn(async move {
                modify_session(store.as_ref(), &rid, |state| {
                    state.sso_groups.push(format!("g{i}"));
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let snapshot = store.get(&rid).await.unwrap();
        assert_eq!(snapshot.value.sso_groups.len(), 4);
        assert_eq!(snapshot.version, 5);
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = InMemorySessionStore::new();
        let rid = store
            .create(SessionState::new(origin(), AuthLevel(10)))
            .await
            .unwrap();
        let stale = store.get(&rid).await.unwrap();
        modify_session(&store, &rid, |state| state.forced_logon = true)
            .await
            .unwrap();
        assert!(matches!(
            store.update(&rid, stale.version, stale.value).await,
            Err(StoreError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let store = InMemorySessionStore::new();
        store
            .create(SessionState::with_ttl(origin(), AuthLevel(10), -1))
            .await
            .unwrap();
        store
            .create(SessionState::new(origin(), AuthLevel(10)))
            .await
            .unwrap();
        assert_eq!(store.cleanup_expired().await.unwrap(), 1);
        assert_eq!(store.count().await, 1);
    }

    #[test]
    fn test_fail_sets_terminal_state() {
        let mut state = SessionState::new(origin(), AuthLevel(10));
        state.fail(ResultCode::AuthspAccessDenied);
        assert_eq!(state.state, HandshakeState::Failed);
        assert_eq!(state.result_code, Some(ResultCode::AuthspAccessDenied));
    }
}
