//! Ticket issuance and the redirect back to the requester.

use axum::http::{header, HeaderMap};
use portunus_core::{ResultCode, Rid, TicketId};
use portunus_envelope::{SignedFields, TrustEnvelope};
use portunus_store::{
    modify_ticket, Grant, Requester, SessionOrigin, SessionState, Ticket, TicketKind, TicketStore,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::{BrokerError, BrokerResult};
use crate::models::BrowserResponse;
use crate::services::with_query;

/// Cookie carrying the sealed TGT for single sign-on.
pub const CREDENTIALS_COOKIE: &str = "aselect_credentials";

/// A stored ticket and its sealed wire form.
#[derive(Debug, Clone)]
pub struct IssuedTicket {
    pub ticket: Ticket,
    pub sealed: String,
}

/// The party a ticket issued for `origin` is bound to.
#[must_use]
pub fn requester_of(origin: &SessionOrigin) -> Requester {
    match origin {
        SessionOrigin::Application { app_id, .. } => Requester::Application(app_id.clone()),
        SessionOrigin::Peer { organization, .. } => Requester::Organization(organization.clone()),
    }
}

/// Creates, renews and seals Ticket-Granting Tickets.
#[derive(Clone)]
pub struct TicketIssuer {
    tickets: Arc<dyn TicketStore>,
    envelope: TrustEnvelope,
    ttl_seconds: i64,
    single_sign_on: bool,
    secure_cookies: bool,
}

impl TicketIssuer {
    #[must_use]
    pub fn new(
        tickets: Arc<dyn TicketStore>,
        envelope: TrustEnvelope,
        ttl_seconds: i64,
        single_sign_on: bool,
        secure_cookies: bool,
    ) -> Self {
        Self {
            tickets,
            envelope,
            ttl_seconds,
            single_sign_on,
            secure_cookies,
        }
    }

    #[must_use]
    pub fn single_sign_on(&self) -> bool {
        self.single_sign_on
    }

    /// Issues a TGT for a completed attempt. A ticket the browser presented
    /// earlier in the attempt is superseded and removed.
    #[instrument(skip(self, rid, session, grant), fields(rid = %rid))]
    pub async fn issue(
        &self,
        rid: &Rid,
        session: &SessionState,
        grant: Grant,
    ) -> BrokerResult<IssuedTicket> {
        if let Some(previous) = &session.existing_ticket {
            if let Err(e) = self.tickets.remove(previous).await {
                debug!(error = %e, "Superseded ticket already gone");
            }
        }
        let ticket = Ticket::granted(
            rid.clone(),
            requester_of(&session.origin),
            grant,
            self.ttl_seconds,
        );
        let issued = self.store(ticket).await?;
        info!(expires_at = %issued.ticket.expires_at, "Ticket issued");
        Ok(issued)
    }

    /// Issues an error ticket so the requester learns `code` through
    /// `verify_credentials`.
    #[instrument(skip(self, rid, origin, code), fields(rid = %rid, result_code = %code))]
    pub async fn issue_error(
        &self,
        rid: &Rid,
        origin: &SessionOrigin,
        code: ResultCode,
    ) -> BrokerResult<IssuedTicket> {
        let ticket = Ticket::error(rid.clone(), requester_of(origin), code);
        self.store(ticket).await
    }

    /// Re-binds an existing TGT to a new attempt without re-authenticating.
    #[instrument(skip(self, id, rid, session), fields(rid = %rid))]
    pub async fn renew(
        &self,
        id: &TicketId,
        rid: &Rid,
        session: &SessionState,
    ) -> BrokerResult<IssuedTicket> {
        let requester = requester_of(&session.origin);
        let app_level = session.required_level;
        let ttl = self.ttl_seconds;
        let (ticket, ()) = modify_ticket(self.tickets.as_ref(), id, |ticket| {
            ticket.renew(rid.clone(), ttl, None);
            ticket.requester = requester.clone();
            if let TicketKind::Granted(grant) = &mut ticket.kind {
                grant.app_level = app_level;
            }
        })
        .await
        .map_err(BrokerError::Ticket)?;
        let sealed = self.envelope.seal_ticket(&ticket.id)?;
        info!("Ticket renewed for single sign-on");
        Ok(IssuedTicket { ticket, sealed })
    }

    /// Extends the expiration after a successful verification.
    pub async fn extend(&self, id: &TicketId) -> BrokerResult<Ticket> {
        let ttl = self.ttl_seconds;
        let (ticket, ()) = modify_ticket(self.tickets.as_ref(), id, |ticket| {
            let rid = ticket.rid.clone();
            ticket.renew(rid, ttl, None);
        })
        .await
        .map_err(BrokerError::Ticket)?;
        Ok(ticket)
    }

    async fn store(&self, ticket: Ticket) -> BrokerResult<IssuedTicket> {
        let sealed = self.envelope.seal_ticket(&ticket.id)?;
        self.tickets
            .insert(ticket.clone())
            .await
            .map_err(BrokerError::Ticket)?;
        Ok(IssuedTicket { ticket, sealed })
    }

    /// Builds the signed browser redirect back to whoever started the attempt.
    ///
    /// Granted tickets are also set as the single-sign-on cookie.
    pub fn redirect(
        &self,
        origin: &SessionOrigin,
        issued: &IssuedTicket,
    ) -> BrokerResult<BrowserResponse> {
        let server = self.envelope.authority().as_str();
        let rid = issued.ticket.rid.as_str();
        let sealed = issued.sealed.as_str();

        let location = match origin {
            SessionOrigin::Application { return_url, .. } => {
                let signature = self
                    .envelope
                    .sign_fields(&SignedFields::credentials(server, rid, sealed))?;
                with_query(
                    return_url,
                    &[
                        ("rid", rid),
                        ("a-select-server", server),
                        ("aselect_credentials", sealed),
                        ("signature", signature.as_str()),
                    ],
                )?
            }
            SessionOrigin::Peer {
                return_url,
                remote_rid,
                ..
            } => {
                let signature = self.envelope.sign_fields(&SignedFields::cross_return(
                    server, rid, remote_rid, sealed,
                ))?;
                with_query(
                    return_url,
                    &[
                        ("a-select-server", server),
                        ("rid", rid),
                        ("local_rid", remote_rid.as_str()),
                        ("aselect_credentials", sealed),
                        ("signature", signature.as_str()),
                    ],
                )?
            }
        };

        let response = BrowserResponse::redirect(location);
        if self.single_sign_on && !issued.ticket.is_error() {
            Ok(response.with_cookie(self.cookie(&issued.sealed)))
        } else {
            Ok(response)
        }
    }

    /// `Set-Cookie` value carrying a sealed ticket.
    #[must_use]
    pub fn cookie(&self, sealed: &str) -> String {
        let mut cookie = format!(
            "{CREDENTIALS_COOKIE}={sealed}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.ttl_seconds
        );
        if self.secure_cookies {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// `Set-Cookie` value removing the single-sign-on cookie.
    #[must_use]
    pub fn clear_cookie(&self) -> String {
        let mut cookie = format!("{CREDENTIALS_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
        if self.secure_cookies {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// Reads the sealed ticket from the request cookies.
#[must_use]
pub fn read_credentials_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == CREDENTIALS_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}
