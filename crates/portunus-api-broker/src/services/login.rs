//! Browser login flow.
//!
//! Drives a session from the `/login` entry through AuthSP selection and the
//! credential handshake to the ticket issuer. The session is re-fetched and
//! written back around every backend call; nothing is held across the
//! network.

use portunus_authsp::{
    AuthspDescriptor, BackendError, BackendVerdict, CredentialPrompt, FailureHandling,
    HandshakeStep, Prepared, RegisteredAuthsp, VerifyRequest,
};
use portunus_core::{AuthspId, OrganizationId, ResultCode, Rid};
use portunus_resources::ResourceError;
use portunus_store::{modify_session, Authenticated, Grant, HandshakeState, SessionOrigin, SessionState};
use tracing::{debug, info, instrument, warn};

use crate::error::{BrokerError, BrokerResult};
use crate::models::forms::{credential_form, generate_auto_submit_form, selection_form};
use crate::models::{AuthspChoiceForm, BrowserResponse, CredentialsForm};
use crate::services::cross_domain;
use crate::state::BrokerState;

pub(crate) fn parse_rid(raw: &str) -> BrokerResult<Rid> {
    raw.trim()
        .parse::<Rid>()
        .map_err(|e| BrokerError::InvalidRequest(e.to_string()))
}

/// `GET /login`: single sign-on, delegation, or the first form.
#[instrument(skip(state, rid, cookie), fields(rid = %rid))]
pub async fn start(
    state: &BrokerState,
    rid: &Rid,
    cookie: Option<&str>,
) -> BrokerResult<BrowserResponse> {
    let session = state
        .sessions
        .get(rid)
        .await
        .map_err(BrokerError::Session)?
        .value;

    match session.state {
        HandshakeState::Init => {}
        HandshakeState::AwaitingCredentials | HandshakeState::Challenge => {
            // Reload of an open form
            let authsp = session
                .authsp
                .as_ref()
                .ok_or_else(|| BrokerError::Internal("open form without AuthSP".to_string()))?;
            let registered = state.authsps.get(authsp)?;
            let prompt = state.handshake.current_prompt(&session, authsp)?;
            return Ok(render_prompt(state, rid, &registered.descriptor, &prompt));
        }
        other => {
            return Err(BrokerError::InvalidRequest(format!(
                "login already in progress ({other:?})"
            )))
        }
    }

    if state.config.single_sign_on && !session.forced_logon {
        if let Some(cookie) = cookie {
            if let Some(response) = try_single_sign_on(state, rid, &session, cookie).await? {
                return Ok(response);
            }
        }
    }

    if let Some(delegation) = &session.delegation {
        let organization = state
            .organizations
            .get(&delegation.remote_organization)?
            .clone();
        return cross_domain::delegate(state, rid, &organization).await;
    }

    if let Some(app_id) = session.app_id() {
        if let Some(forced) = state.applications.get(app_id)?.forced_authsp.clone() {
            return begin(state, rid, &forced).await;
        }
    }

    let authsps = state.authsps.eligible(session.required_level);
    let organizations: Vec<_> = state
        .organizations
        .selectable(session.required_level)
        .into_iter()
        .filter(|org| Some(&org.id) != requesting_peer(&session))
        .collect();

    match (authsps.as_slice(), organizations.is_empty()) {
        ([], true) => {
            warn!(level = %session.required_level, "No AuthSP or organization for level");
            terminate(
                state,
                rid,
                ResultCode::LevelNotAvailable,
                FailureHandling::Aselect,
            )
            .await
        }
        ([only], true) if only.direct => begin(state, rid, &only.id).await,
        _ => Ok(BrowserResponse::page(selection_form(
            &state.config.endpoint("/login/authsp"),
            &state.config.endpoint("/login/organization"),
            rid,
            &authsps,
            &organizations,
        ))),
    }
}

fn requesting_peer(session: &SessionState) -> Option<&OrganizationId> {
    match &session.origin {
        SessionOrigin::Peer { organization, .. } => Some(organization),
        SessionOrigin::Application { .. } => None,
    }
}

/// Reuses a valid ticket from the credentials cookie when it covers the
/// request. Returns `None` to fall through to a fresh authentication.
async fn try_single_sign_on(
    state: &BrokerState,
    rid: &Rid,
    session: &SessionState,
    cookie: &str,
) -> BrokerResult<Option<BrowserResponse>> {
    let Ok(id) = state.envelope.open_ticket(cookie) else {
        debug!("Ignoring unreadable credentials cookie");
        return Ok(None);
    };
    let ticket = match state.tickets.get(&id).await {
        Ok(snapshot) => snapshot.value,
        Err(e) => {
            debug!(error = %e, "Credentials cookie does not name a usable ticket");
            return Ok(None);
        }
    };
    let Some(grant) = ticket.grant() else {
        return Ok(None);
    };

    let level_ok = grant.authsp_level.satisfies(session.required_level);
    let uid_ok = session
        .forced_uid
        .as_deref()
        .map_or(true, |uid| uid == grant.uid);
    let group_ok = match &session.origin {
        SessionOrigin::Application { app_id, .. } => state
            .applications
            .get(app_id)?
            .shares_sso_group(&grant.sso_groups),
        SessionOrigin::Peer { .. } => true,
    };

    if !(level_ok && uid_ok && group_ok) {
        debug!(
            level_ok = level_ok,
            uid_ok = uid_ok,
            group_ok = group_ok,
            "Existing ticket does not cover this request"
        );
        let superseded = id.clone();
        modify_session(state.sessions.as_ref(), rid, |s| {
            s.existing_ticket = Some(superseded.clone());
        })
        .await
        .map_err(BrokerError::Session)?;
        return Ok(None);
    }

    let session = state
        .sessions
        .delete(rid)
        .await
        .map_err(BrokerError::Session)?;
    let issued = state.issuer.renew(&id, rid, &session).await?;
    info!(target: "audit", rid = %rid, uid = %grant.uid, "Single sign-on");
    state.issuer.redirect(&session.origin, &issued).map(Some)
}

/// INIT for one AuthSP: issues the first credential form.
#[instrument(skip(state, rid), fields(rid = %rid, authsp = %authsp))]
pub async fn begin(
    state: &BrokerState,
    rid: &Rid,
    authsp: &AuthspId,
) -> BrokerResult<BrowserResponse> {
    let descriptor = state.authsps.get(authsp)?.descriptor.clone();
    let handshake = &state.handshake;
    let (_, prompt) = modify_session(state.sessions.as_ref(), rid, |session| {
        handshake.begin(session, &descriptor)
    })
    .await
    .map_err(BrokerError::Session)?;

    match prompt {
        Ok(prompt) => Ok(render_prompt(state, rid, &descriptor, &prompt)),
        Err(e) => {
            warn!(error = %e, "Cannot start AuthSP");
            terminate(state, rid, e.result_code(), FailureHandling::Aselect).await
        }
    }
}

/// `POST /login/authsp`
pub async fn choose_authsp(
    state: &BrokerState,
    form: AuthspChoiceForm,
) -> BrokerResult<BrowserResponse> {
    let rid = parse_rid(&form.rid)?;
    if form.cancel.is_some() {
        return cancel(state, &rid).await;
    }
    let authsp = form
        .authsp
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| BrokerError::InvalidRequest("missing authsp".to_string()))?;
    let authsp = AuthspId::new(authsp);

    let session = state
        .sessions
        .get(&rid)
        .await
        .map_err(BrokerError::Session)?
        .value;
    if let Some(app_id) = session.app_id() {
        let forced = state.applications.get(app_id)?.forced_authsp.as_ref();
        if forced.is_some_and(|forced| forced != &authsp) {
            warn!(rid = %rid, authsp = %authsp, "AuthSP differs from the forced AuthSP");
            return terminate(state, &rid, ResultCode::InvalidRequest, FailureHandling::Aselect)
                .await;
        }
    }
    begin(state, &rid, &authsp).await
}

/// `POST /login/organization`
#[instrument(skip(state, rid), fields(rid = %rid, organization = %organization))]
pub async fn choose_organization(
    state: &BrokerState,
    rid: &Rid,
    organization: &OrganizationId,
) -> BrokerResult<BrowserResponse> {
    let session = state
        .sessions
        .get(rid)
        .await
        .map_err(BrokerError::Session)?
        .value;
    let offered = state
        .organizations
        .selectable(session.required_level)
        .into_iter()
        .find(|org| &org.id == organization && Some(&org.id) != requesting_peer(&session))
        .cloned()
        .ok_or_else(|| {
            BrokerError::InvalidRequest(format!("organization {organization} is not offered"))
        })?;
    cross_domain::delegate(state, rid, &offered).await
}

/// `POST /login/credentials`
#[instrument(skip(state, form), fields(rid = %form.rid, authsp = %form.authsp))]
pub async fn submit_credentials(
    state: &BrokerState,
    form: CredentialsForm,
) -> BrokerResult<BrowserResponse> {
    let rid = parse_rid(&form.rid)?;
    if form.is_cancel() {
        return cancel(state, &rid).await;
    }

    let registered = state
        .authsps
        .get(&AuthspId::new(form.authsp.trim()))?
        .clone();
    let descriptor = registered.descriptor.clone();
    let submission = form.into_submission();
    let handshake = &state.handshake;

    let (_, prepared) = modify_session(state.sessions.as_ref(), &rid, |session| {
        handshake.accept(session, &descriptor, &submission)
    })
    .await
    .map_err(BrokerError::Session)?;

    let mut request = match prepared {
        Ok(Prepared::Ready(request)) => request,
        Ok(Prepared::Incomplete(prompt)) => {
            return Ok(render_prompt(state, &rid, &descriptor, &prompt));
        }
        Err(e) => {
            warn!(error = %e, "Credential submission rejected");
            return terminate(state, &rid, e.result_code(), FailureHandling::Aselect).await;
        }
    };

    let outcome = verify(state, &registered, &mut request).await;

    let (_, step) = modify_session(state.sessions.as_ref(), &rid, |session| {
        handshake.conclude(session, &descriptor, &request, outcome.clone())
    })
    .await
    .map_err(BrokerError::Session)?;

    match step? {
        HandshakeStep::Authenticated(authenticated) => complete(state, &rid, authenticated).await,
        HandshakeStep::Chain { next } => Ok(BrowserResponse::page(generate_auto_submit_form(
            &state.config.endpoint("/login/authsp"),
            &[("rid", rid.as_str()), ("authsp", next.as_str())],
        ))),
        HandshakeStep::Retry(prompt) => {
            warn!(target: "audit", rid = %rid, authsp = %descriptor.id, "Credentials rejected");
            Ok(render_prompt(state, &rid, &descriptor, &prompt))
        }
        HandshakeStep::Challenge(prompt) => Ok(render_prompt(state, &rid, &descriptor, &prompt)),
        HandshakeStep::Failed(code) => {
            terminate(state, &rid, code, descriptor.failure_handling).await
        }
    }
}

/// Selects the AuthSP's endpoint, runs the backend and reports endpoint
/// failures back to the selector.
async fn verify(
    state: &BrokerState,
    registered: &RegisteredAuthsp,
    request: &mut VerifyRequest,
) -> Result<BackendVerdict, BackendError> {
    let group = registered.descriptor.resource_group.as_deref();
    if let Some(group) = group {
        match state.selector.select(group).await {
            Ok(resource) => request.resource = Some(resource),
            Err(ResourceError::NoActiveResource(group)) => {
                return Err(BackendError::Unavailable(format!(
                    "no active resource in group {group}"
                )));
            }
            Err(e) => return Err(BackendError::Configuration(e.to_string())),
        }
    }

    let outcome = registered.backend.verify(request).await;
    if let (Err(e), Some(group), Some(resource)) = (&outcome, group, &request.resource) {
        if e.is_endpoint_failure() {
            state.selector.report_failure(group, resource).await;
        }
    }
    outcome
}

/// Consumes the session and hands the authenticated user to the issuer.
pub(crate) async fn complete(
    state: &BrokerState,
    rid: &Rid,
    authenticated: Authenticated,
) -> BrokerResult<BrowserResponse> {
    let session = state
        .sessions
        .delete(rid)
        .await
        .map_err(BrokerError::Session)?;

    info!(
        target: "audit",
        rid = %rid,
        uid = %authenticated.uid,
        organization = %authenticated.organization,
        authsp = %authenticated.authsp,
        level = %authenticated.level,
        elapsed_seconds = session.elapsed_seconds(),
        "User authenticated"
    );

    let grant = Grant {
        uid: authenticated.uid,
        organization: authenticated.organization,
        authsp: authenticated.authsp,
        authsp_level: authenticated.level,
        app_level: session.required_level,
        sso_groups: session.sso_groups.clone(),
        attributes: authenticated.attributes,
    };
    let issued = state.issuer.issue(rid, &session, grant).await?;
    state.issuer.redirect(&session.origin, &issued)
}

/// Consumes the session after a terminal failure.
///
/// `Local` handling sends the requester an error ticket, `Aselect` renders
/// the broker's own error page.
pub(crate) async fn terminate(
    state: &BrokerState,
    rid: &Rid,
    code: ResultCode,
    handling: FailureHandling,
) -> BrokerResult<BrowserResponse> {
    let session = state
        .sessions
        .delete(rid)
        .await
        .map_err(BrokerError::Session)?;

    warn!(
        target: "audit",
        rid = %rid,
        requester = %session.requester_key(),
        result_code = %code,
        elapsed_seconds = session.elapsed_seconds(),
        "Authentication denied"
    );

    match handling {
        FailureHandling::Local => {
            let issued = state.issuer.issue_error(rid, &session.origin, code).await?;
            state.issuer.redirect(&session.origin, &issued)
        }
        FailureHandling::Aselect => Err(BrokerError::Denied(code)),
    }
}

/// The user pressed cancel: the requester gets a `CANCEL` error ticket.
async fn cancel(state: &BrokerState, rid: &Rid) -> BrokerResult<BrowserResponse> {
    terminate(state, rid, ResultCode::Cancel, FailureHandling::Local).await
}

fn render_prompt(
    state: &BrokerState,
    rid: &Rid,
    descriptor: &AuthspDescriptor,
    prompt: &CredentialPrompt,
) -> BrowserResponse {
    BrowserResponse::page(credential_form(
        &state.config.endpoint("/login/credentials"),
        rid,
        descriptor,
        prompt,
    ))
}
