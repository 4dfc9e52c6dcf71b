//! Cross-domain delegation between broker instances.
//!
//! Delegating side: [`delegate`] redirects the browser to a peer's
//! `/cross/login`, and [`handle_return`] confirms the returned ticket through
//! the peer's back-channel before issuing a local ticket.
//!
//! Peer side: [`accept_delegation`] opens a local session on behalf of the
//! delegating broker. The rest of that attempt is an ordinary login whose
//! redirect goes back to the delegating broker's `as_url`.

use portunus_authsp::FailureHandling;
use portunus_core::{AttributeBag, AuthLevel, AuthorityId, AuthspId, OrganizationId, ResultCode, Rid};
use portunus_envelope::{SignedFields, TrustEnvelope, VerifyResponseFields};
use portunus_store::{
    modify_session, Authenticated, DelegationRecord, HandshakeState, SessionOrigin, SessionState,
};
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

use crate::error::{BrokerError, BrokerResult};
use crate::models::{BrowserResponse, CrossLoginQuery, CrossReturnQuery};
use crate::services::login::{self, parse_rid};
use crate::services::organizations::OrganizationDescriptor;
use crate::services::{check_signature, with_query};
use crate::state::BrokerState;

/// What the peer's `verify_credentials` said.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerVerdict {
    Granted(Authenticated),
    /// The peer answered with its cancel code.
    Cancelled,
    /// Any other non-success code, verbatim.
    Denied(String),
}

/// Redirects the browser to `organization` for the whole authentication.
#[instrument(skip(state, rid, organization), fields(rid = %rid, organization = %organization.id))]
pub async fn delegate(
    state: &BrokerState,
    rid: &Rid,
    organization: &OrganizationDescriptor,
) -> BrokerResult<BrowserResponse> {
    let login_url = organization.login_url.as_deref().ok_or_else(|| {
        BrokerError::UnknownOrganization(format!(
            "{} does not accept delegations",
            organization.id
        ))
    })?;

    let remote = organization.id.clone();
    let (session, allowed) = modify_session(state.sessions.as_ref(), rid, |session| {
        if !matches!(
            session.state,
            HandshakeState::Init | HandshakeState::AwaitingCredentials
        ) {
            return false;
        }
        session.delegation = Some(DelegationRecord {
            remote_organization: remote.clone(),
            remote_rid: None,
        });
        session.state = HandshakeState::Delegated;
        true
    })
    .await
    .map_err(BrokerError::Session)?;
    if !allowed {
        return Err(BrokerError::InvalidRequest(format!(
            "cannot delegate in state {:?}",
            session.state
        )));
    }

    let server = state.envelope.authority().as_str();
    let as_url = state.config.endpoint("/cross/return");
    let level = session.required_level.to_string();
    let uid = session.forced_uid.as_deref();
    let signature = state.envelope.sign_fields(&SignedFields::cross_login(
        server,
        rid.as_str(),
        &as_url,
        &level,
        uid,
    ))?;

    let mut pairs = vec![
        ("a-select-server", server),
        ("local_rid", rid.as_str()),
        ("as_url", as_url.as_str()),
        ("required_level", level.as_str()),
    ];
    if let Some(uid) = uid {
        pairs.push(("uid", uid));
    }
    if let Some(country) = session.country.as_deref() {
        pairs.push(("country", country));
    }
    if let Some(language) = session.language.as_deref() {
        pairs.push(("language", language));
    }
    pairs.push(("signature", signature.as_str()));

    info!("Delegating authentication to peer");
    Ok(BrowserResponse::redirect(with_query(login_url, &pairs)?))
}

/// `GET /cross/return`: the browser is back from the peer.
#[instrument(skip(state, query), fields(rid = %query.local_rid, organization = %query.server))]
pub async fn handle_return(
    state: &BrokerState,
    query: CrossReturnQuery,
) -> BrokerResult<BrowserResponse> {
    let local_rid = parse_rid(&query.local_rid)?;
    let peer_id = OrganizationId::new(query.server.trim());
    let organization = state.organizations.get(&peer_id)?.clone();

    let session = state
        .sessions
        .get(&local_rid)
        .await
        .map_err(BrokerError::Session)?
        .value;
    let delegated_to = session
        .delegation
        .as_ref()
        .map(|record| &record.remote_organization);
    if session.state != HandshakeState::Delegated || delegated_to != Some(&peer_id) {
        return Err(BrokerError::InvalidRequest(format!(
            "no delegation to {peer_id} for this request"
        )));
    }

    let signed = SignedFields::cross_return(
        &query.server,
        &query.rid,
        &query.local_rid,
        &query.aselect_credentials,
    );
    if let Err(e) = check_signature(
        &state.envelope,
        peer_id.as_str(),
        &signed,
        query.signature.as_deref(),
        organization.require_signing,
    ) {
        warn!(error = %e, "Peer return rejected");
        return login::terminate(state, &local_rid, e.result_code(), FailureHandling::Aselect)
            .await;
    }

    let remote_rid = query.rid.clone();
    modify_session(state.sessions.as_ref(), &local_rid, |session| {
        if let Some(record) = session.delegation.as_mut() {
            record.remote_rid = Some(remote_rid.clone());
        }
    })
    .await
    .map_err(BrokerError::Session)?;

    let verdict = match confirm(state, &organization, &query.rid, &query.aselect_credentials).await
    {
        Ok(verdict) => verdict,
        Err(e) => {
            let code = e.result_code();
            warn!(error = %e, result_code = %code, "Peer verification failed");
            // A broken peer answer never turns into a ticket.
            let handling = if code == ResultCode::TgtNotValid {
                FailureHandling::Aselect
            } else {
                organization.failure_handling
            };
            return login::terminate(state, &local_rid, code, handling).await;
        }
    };

    match verdict {
        PeerVerdict::Granted(authenticated) => {
            if !authenticated.level.satisfies(session.required_level) {
                warn!(level = %authenticated.level, "Peer authenticated below the required level");
                return login::terminate(
                    state,
                    &local_rid,
                    ResultCode::LevelNotAvailable,
                    organization.failure_handling,
                )
                .await;
            }
            login::complete(state, &local_rid, authenticated).await
        }
        PeerVerdict::Cancelled => {
            info!(target: "audit", rid = %local_rid, organization = %peer_id, "User cancelled at peer");
            login::terminate(state, &local_rid, ResultCode::Cancel, FailureHandling::Local).await
        }
        PeerVerdict::Denied(code) => {
            warn!(target: "audit", rid = %local_rid, organization = %peer_id, peer_result_code = %code, "Peer denied authentication");
            login::terminate(
                state,
                &local_rid,
                ResultCode::AuthspAccessDenied,
                organization.failure_handling,
            )
            .await
        }
    }
}

/// Calls the peer's `verify_credentials` on its active back-channel endpoint.
async fn confirm(
    state: &BrokerState,
    organization: &OrganizationDescriptor,
    remote_rid: &str,
    credentials: &str,
) -> BrokerResult<PeerVerdict> {
    let group = organization.resource_group.as_deref().ok_or_else(|| {
        BrokerError::Configuration(format!("organization {} has no resource group", organization.id))
    })?;
    let resource = state.selector.select(group).await?;

    let server = organization.id.as_str();
    let signature = if state.config.sign_requests {
        Some(
            state
                .envelope
                .sign_fields(&SignedFields::credentials(server, remote_rid, credentials))?,
        )
    } else {
        None
    };
    let mut form = vec![
        ("request", "verify_credentials"),
        ("a-select-server", server),
        ("rid", remote_rid),
        ("aselect_credentials", credentials),
    ];
    if let Some(signature) = signature.as_deref() {
        form.push(("signature", signature));
    }

    let body = match send(state, &resource.url, &form).await {
        Ok(body) => body,
        Err(message) => {
            warn!(url = %resource.url, error = %message, "Peer back-channel call failed");
            state.selector.report_failure(group, &resource).await;
            return Err(BrokerError::Backchannel(message));
        }
    };

    let fields: BTreeMap<String, String> = match serde_urlencoded::from_str(&body) {
        Ok(fields) => fields,
        Err(e) => {
            warn!(url = %resource.url, error = %e, "Undecodable peer response");
            state.selector.report_failure(group, &resource).await;
            return Err(BrokerError::Backchannel(format!("undecodable response: {e}")));
        }
    };

    interpret_response(&state.envelope, organization, remote_rid, &fields)
}

async fn send(state: &BrokerState, url: &str, form: &[(&str, &str)]) -> Result<String, String> {
    let response = state
        .http
        .post(url)
        .form(form)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("peer returned HTTP {}", response.status()));
    }
    response.text().await.map_err(|e| e.to_string())
}

/// Checks and decodes a `verify_credentials` response from a peer.
pub fn interpret_response(
    envelope: &TrustEnvelope,
    organization: &OrganizationDescriptor,
    remote_rid: &str,
    fields: &BTreeMap<String, String>,
) -> BrokerResult<PeerVerdict> {
    let get = |key: &str| {
        fields
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    };
    let invalid = |message: &str| BrokerError::TgtNotValid(message.to_string());

    let result_code = get("result_code").ok_or_else(|| invalid("missing result_code"))?;

    if organization.require_signing {
        let signed = SignedFields::verify_credentials_response(&VerifyResponseFields {
            rid: get("rid").unwrap_or_default(),
            result_code,
            uid: get("uid"),
            organization: get("organization"),
            authsp: get("authsp"),
            authsp_level: get("authsp_level"),
            app_level: get("app_level"),
            tgt_exp_time: get("tgt_exp_time"),
            attributes: get("attributes"),
        });
        let authority = AuthorityId::new(organization.id.as_str());
        let verified = get("signature")
            .is_some_and(|signature| envelope.verify_fields(&authority, &signed, signature));
        if !verified {
            return Err(invalid("response signature does not verify"));
        }
    }

    if result_code == organization.cancel_code.as_str() {
        return Ok(PeerVerdict::Cancelled);
    }
    if result_code != ResultCode::Success.as_str() {
        return Ok(PeerVerdict::Denied(result_code.to_string()));
    }

    if get("rid") != Some(remote_rid) {
        return Err(invalid("response is for another request"));
    }
    let uid = get("uid").ok_or_else(|| invalid("missing uid"))?;
    let remote_organization = get("organization").ok_or_else(|| invalid("missing organization"))?;
    let authsp = get("authsp").ok_or_else(|| invalid("missing authsp"))?;
    let level: AuthLevel = get("authsp_level")
        .ok_or_else(|| invalid("missing authsp_level"))?
        .parse()
        .map_err(|_| invalid("malformed authsp_level"))?;
    get("app_level").ok_or_else(|| invalid("missing app_level"))?;
    get("tgt_exp_time").ok_or_else(|| invalid("missing tgt_exp_time"))?;
    let attributes = match get("attributes") {
        Some(wire) => AttributeBag::from_wire(wire).map_err(|_| invalid("malformed attributes"))?,
        None => AttributeBag::new(),
    };

    Ok(PeerVerdict::Granted(Authenticated {
        uid: uid.to_string(),
        organization: OrganizationId::new(remote_organization),
        authsp: AuthspId::new(authsp),
        level,
        attributes,
    }))
}

/// `GET /cross/login`: a peer delegates an authentication to us.
#[instrument(skip(state, query, cookie), fields(organization = %query.server))]
pub async fn accept_delegation(
    state: &BrokerState,
    query: CrossLoginQuery,
    cookie: Option<&str>,
) -> BrokerResult<BrowserResponse> {
    let requester = OrganizationId::new(query.server.trim());
    let organization = state.organizations.get(&requester)?;

    let signed = SignedFields::cross_login(
        &query.server,
        &query.local_rid,
        &query.as_url,
        &query.required_level,
        query.uid.as_deref(),
    );
    check_signature(
        &state.envelope,
        requester.as_str(),
        &signed,
        query.signature.as_deref(),
        organization.require_signing,
    )?;

    if query.local_rid.trim().is_empty() {
        return Err(BrokerError::InvalidRequest("missing local_rid".to_string()));
    }
    if !organization.allows_return_url(&query.as_url) {
        return Err(BrokerError::InvalidRequest(format!(
            "as_url not allowed for {requester}"
        )));
    }
    let level: AuthLevel = query
        .required_level
        .parse()
        .map_err(|e: portunus_core::CoreError| BrokerError::InvalidRequest(e.to_string()))?;

    let mut session = SessionState::with_ttl(
        SessionOrigin::Peer {
            organization: requester.clone(),
            return_url: query.as_url,
            remote_rid: query.local_rid,
        },
        level,
        state.config.session_ttl_seconds,
    );
    session.forced_uid = query.uid.filter(|uid| !uid.trim().is_empty());
    session.country = query.country;
    session.language = query.language;

    let rid = state
        .sessions
        .create(session)
        .await
        .map_err(BrokerError::Session)?;
    info!(rid = %rid, "Accepted delegation from peer");
    login::start(state, &rid, cookie).await
}
