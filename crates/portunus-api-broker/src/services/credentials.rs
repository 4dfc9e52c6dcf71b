//! Ticket verification and the other back-channel requests.

use portunus_core::{AppId, ResultCode, TicketId};
use portunus_envelope::{SignedFields, VerifyResponseFields};
use portunus_store::{Requester, Ticket, TicketKind};
use tracing::{debug, info, instrument, warn};

use crate::error::{BrokerError, BrokerResult};
use crate::models::{ApiForm, ApiReply};
use crate::services::check_signature;
use crate::state::BrokerState;

/// Whether `requester` must sign its back-channel requests.
fn signing_required(state: &BrokerState, requester: &Requester) -> BrokerResult<bool> {
    match requester {
        Requester::Application(app_id) => Ok(state.applications.get(app_id)?.require_signing),
        Requester::Organization(id) => Ok(state.organizations.get(id)?.require_signing),
    }
}

fn requester_key(requester: &Requester) -> &str {
    match requester {
        Requester::Application(app_id) => app_id.as_str(),
        Requester::Organization(id) => id.as_str(),
    }
}

/// Opens a sealed credential and loads the ticket it names.
async fn load_ticket(state: &BrokerState, sealed: &str) -> BrokerResult<(TicketId, Ticket)> {
    let id = state.envelope.open_ticket(sealed).map_err(|e| {
        debug!(error = %e, "Credential does not open");
        BrokerError::TgtNotValid("credential does not open".to_string())
    })?;
    let ticket = state
        .tickets
        .get(&id)
        .await
        .map_err(BrokerError::Ticket)?
        .value;
    Ok((id, ticket))
}

/// `request=verify_credentials`.
///
/// Error tickets are consumed and their code returned. Granted tickets are
/// kept and extended when single sign-on is on, otherwise consumed.
#[instrument(skip(state, form), fields(rid = ?form.rid))]
pub async fn verify_credentials(state: &BrokerState, form: &ApiForm) -> BrokerResult<ApiReply> {
    let server = state.envelope.authority().as_str();
    let rid = ApiForm::required(&form.rid, "rid")?;
    let sealed = ApiForm::required(&form.aselect_credentials, "aselect_credentials")?;

    let (id, ticket) = load_ticket(state, sealed).await?;
    if ticket.rid.as_str() != rid {
        warn!(ticket_rid = %ticket.rid, "Credential presented for another request");
        return Err(BrokerError::TgtNotValid(
            "credential was issued for another request".to_string(),
        ));
    }

    check_signature(
        &state.envelope,
        requester_key(&ticket.requester),
        &SignedFields::credentials(server, rid, sealed),
        form.signature.as_deref(),
        signing_required(state, &ticket.requester)?,
    )?;

    let ticket = match &ticket.kind {
        TicketKind::Error { result_code } => {
            let code = *result_code;
            if let Err(e) = state.tickets.remove(&id).await {
                debug!(error = %e, "Error ticket already gone");
            }
            info!(result_code = %code, "Delivered delayed error");
            return Err(BrokerError::Denied(code));
        }
        TicketKind::Granted(_) if state.issuer.single_sign_on() => state.issuer.extend(&id).await?,
        TicketKind::Granted(_) => state
            .tickets
            .remove(&id)
            .await
            .map_err(BrokerError::Ticket)?,
    };
    let grant = ticket
        .grant()
        .ok_or_else(|| BrokerError::Internal("granted ticket without grant".to_string()))?;

    let authsp_level = grant.authsp_level.to_string();
    let app_level = grant.app_level.to_string();
    let tgt_exp_time = ticket.expiration_timestamp().to_string();
    let attributes = if grant.attributes.is_empty() {
        None
    } else {
        Some(
            grant
                .attributes
                .to_wire()
                .map_err(|e| BrokerError::Internal(e.to_string()))?,
        )
    };

    let fields = VerifyResponseFields {
        rid,
        result_code: ResultCode::Success.as_str(),
        uid: Some(grant.uid.as_str()),
        organization: Some(grant.organization.as_str()),
        authsp: Some(grant.authsp.as_str()),
        authsp_level: Some(authsp_level.as_str()),
        app_level: Some(app_level.as_str()),
        tgt_exp_time: Some(tgt_exp_time.as_str()),
        attributes: attributes.as_deref(),
    };
    let signature = state
        .envelope
        .sign_fields(&SignedFields::verify_credentials_response(&fields))?;

    info!(uid = %grant.uid, requester = %requester_key(&ticket.requester), "Credentials verified");
    Ok(ApiReply::new(ResultCode::Success)
        .field("rid", rid)
        .field("uid", grant.uid.as_str())
        .field("organization", grant.organization.as_str())
        .field("authsp", grant.authsp.as_str())
        .field("authsp_level", authsp_level.as_str())
        .field("app_level", app_level.as_str())
        .field("tgt_exp_time", tgt_exp_time.as_str())
        .optional("attributes", attributes.as_deref())
        .field("signature", signature))
}

/// `request=kill_tgt`: global logout of one ticket.
#[instrument(skip(state, form))]
pub async fn kill_tgt(state: &BrokerState, form: &ApiForm) -> BrokerResult<ApiReply> {
    let server = state.envelope.authority().as_str();
    let sealed = ApiForm::required(&form.aselect_credentials, "aselect_credentials")?;
    let (id, ticket) = load_ticket(state, sealed).await?;

    check_signature(
        &state.envelope,
        requester_key(&ticket.requester),
        &SignedFields::kill_tgt(server, sealed),
        form.signature.as_deref(),
        signing_required(state, &ticket.requester)?,
    )?;

    state
        .tickets
        .remove(&id)
        .await
        .map_err(BrokerError::Ticket)?;
    info!(target: "audit", requester = %requester_key(&ticket.requester), "Ticket killed");
    Ok(ApiReply::new(ResultCode::Success))
}

/// `request=kill_session`: abandons an open authentication attempt.
#[instrument(skip(state, form), fields(rid = ?form.rid))]
pub async fn kill_session(state: &BrokerState, form: &ApiForm) -> BrokerResult<ApiReply> {
    let server = state.envelope.authority().as_str();
    let raw = ApiForm::required(&form.rid, "rid")?;
    let rid = crate::services::login::parse_rid(raw)?;

    let session = state
        .sessions
        .get(&rid)
        .await
        .map_err(BrokerError::Session)?
        .value;
    let requester = crate::services::ticket_issuer::requester_of(&session.origin);
    check_signature(
        &state.envelope,
        requester_key(&requester),
        &SignedFields::kill_session(server, raw),
        form.signature.as_deref(),
        signing_required(state, &requester)?,
    )?;

    state
        .sessions
        .delete(&rid)
        .await
        .map_err(BrokerError::Session)?;
    info!("Session killed");
    Ok(ApiReply::new(ResultCode::Success).field("rid", rid.as_str()))
}

/// `request=get_app_level`.
#[instrument(skip(state, form), fields(app_id = ?form.app_id))]
pub async fn get_app_level(state: &BrokerState, form: &ApiForm) -> BrokerResult<ApiReply> {
    let server = state.envelope.authority().as_str();
    let app_id = AppId::new(ApiForm::required(&form.app_id, "app_id")?);
    let application = state.applications.get(&app_id)?;

    check_signature(
        &state.envelope,
        app_id.as_str(),
        &SignedFields::get_app_level(server, app_id.as_str()),
        form.signature.as_deref(),
        application.require_signing,
    )?;

    Ok(ApiReply::new(ResultCode::Success).field("app_level", application.level.to_string()))
}
