//! Back-channel handler for applications and peer brokers
//!
//! Every request is a form POST to `/api` selected by the `request` field.
//! Replies are form-encoded and always carry a `result_code`; failures never
//! surface as HTTP errors.

use axum::{
    extract::{rejection::FormRejection, State},
    Form,
};
use portunus_core::ResultCode;

use crate::error::{BrokerError, BrokerResult};
use crate::models::{ApiForm, ApiReply};
use crate::services::{authenticate, credentials};
use crate::state::BrokerState;

/// `POST /api`
pub async fn api(
    State(state): State<BrokerState>,
    form: Result<Form<ApiForm>, FormRejection>,
) -> ApiReply {
    let form = match form {
        Ok(Form(form)) => form,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed back-channel request");
            return ApiReply::new(ResultCode::InvalidRequest);
        }
    };

    match dispatch(&state, &form).await {
        Ok(reply) => reply,
        Err(e) => {
            let code = e.result_code();
            if code == ResultCode::InternalError {
                tracing::error!(error = %e, request = %form.request, "Back-channel request failed");
            } else {
                tracing::info!(error = %e, request = %form.request, result_code = %code, "Back-channel request refused");
            }
            ApiReply::new(code).optional("rid", form.rid.as_deref())
        }
    }
}

async fn dispatch(state: &BrokerState, form: &ApiForm) -> BrokerResult<ApiReply> {
    // Back-channel requests name the broker they are meant for.
    let server = ApiForm::required(&form.server, "a-select-server")?;
    if server != state.envelope.authority().as_str() {
        return Err(BrokerError::InvalidRequest(format!(
            "request addressed to {server}"
        )));
    }

    match form.request.as_str() {
        "authenticate" => authenticate::authenticate(state, form).await,
        "verify_credentials" => credentials::verify_credentials(state, form).await,
        "kill_tgt" => credentials::kill_tgt(state, form).await,
        "kill_session" => credentials::kill_session(state, form).await,
        "get_app_level" => credentials::get_app_level(state, form).await,
        other => Err(BrokerError::InvalidRequest(format!(
            "unknown request {other:?}"
        ))),
    }
}
