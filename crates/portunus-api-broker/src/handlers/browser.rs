//! Browser-facing handlers
//!
//! Each handler delegates to the login or cross-domain service and renders
//! failures as the broker's error page.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Form,
};
use portunus_core::OrganizationId;

use crate::error::BrokerResult;
use crate::models::forms::logout_page;
use crate::models::{
    AuthspChoiceForm, BrowserResponse, CredentialsForm, CrossLoginQuery, CrossReturnQuery,
    LoginQuery, OrganizationChoiceForm,
};
use crate::services::login::parse_rid;
use crate::services::ticket_issuer::read_credentials_cookie;
use crate::services::{cross_domain, login};
use crate::state::BrokerState;

fn respond(result: BrokerResult<BrowserResponse>, context: &str) -> Response {
    match result {
        Ok(response) => response.into_response(),
        Err(e) => {
            tracing::error!(error = %e, result_code = %e.result_code(), "{}", context);
            e.into_response()
        }
    }
}

/// `GET /login?rid=...`
pub async fn login(
    State(state): State<BrokerState>,
    headers: HeaderMap,
    Query(query): Query<LoginQuery>,
) -> Response {
    let cookie = read_credentials_cookie(&headers);
    let result = match parse_rid(&query.rid) {
        Ok(rid) => login::start(&state, &rid, cookie.as_deref()).await,
        Err(e) => Err(e),
    };
    respond(result, "Login failed")
}

/// `POST /login/authsp`
pub async fn choose_authsp(
    State(state): State<BrokerState>,
    Form(form): Form<AuthspChoiceForm>,
) -> Response {
    respond(login::choose_authsp(&state, form).await, "AuthSP selection failed")
}

/// `POST /login/organization`
pub async fn choose_organization(
    State(state): State<BrokerState>,
    Form(form): Form<OrganizationChoiceForm>,
) -> Response {
    let result = match parse_rid(&form.rid) {
        Ok(rid) => {
            let organization = OrganizationId::new(form.organization.trim());
            login::choose_organization(&state, &rid, &organization).await
        }
        Err(e) => Err(e),
    };
    respond(result, "Organization selection failed")
}

/// `POST /login/credentials`
pub async fn submit_credentials(
    State(state): State<BrokerState>,
    Form(form): Form<CredentialsForm>,
) -> Response {
    respond(
        login::submit_credentials(&state, form).await,
        "Credential submission failed",
    )
}

/// `GET /cross/login`: a peer delegates an authentication here.
pub async fn cross_login(
    State(state): State<BrokerState>,
    headers: HeaderMap,
    Query(query): Query<CrossLoginQuery>,
) -> Response {
    let cookie = read_credentials_cookie(&headers);
    respond(
        cross_domain::accept_delegation(&state, query, cookie.as_deref()).await,
        "Incoming delegation failed",
    )
}

/// `GET /cross/return`: the browser comes back from a peer.
pub async fn cross_return(
    State(state): State<BrokerState>,
    Query(query): Query<CrossReturnQuery>,
) -> Response {
    respond(
        cross_domain::handle_return(&state, query).await,
        "Delegation return failed",
    )
}

/// `GET /logout`: drops the single-sign-on ticket of this browser.
pub async fn logout(State(state): State<BrokerState>, headers: HeaderMap) -> Response {
    if let Some(sealed) = read_credentials_cookie(&headers) {
        match state.envelope.open_ticket(&sealed) {
            Ok(id) => match state.tickets.remove(&id).await {
                Ok(ticket) => {
                    tracing::info!(target: "audit", rid = %ticket.rid, "User logged out");
                }
                Err(e) => tracing::debug!(error = %e, "Logout without live ticket"),
            },
            Err(e) => tracing::debug!(error = %e, "Logout cookie does not open"),
        }
    }
    BrowserResponse::page(logout_page())
        .with_cookie(state.issuer.clear_cookie())
        .into_response()
}
