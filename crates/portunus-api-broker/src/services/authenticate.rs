//! `request=authenticate`: an application opens an authentication attempt.

use portunus_core::{AppId, OrganizationId, ResultCode};
use portunus_envelope::SignedFields;
use portunus_store::{DelegationRecord, SessionOrigin, SessionState};
use tracing::{info, instrument};

use crate::error::{BrokerError, BrokerResult};
use crate::models::{ApiForm, ApiReply};
use crate::services::check_signature;
use crate::state::BrokerState;

fn parse_flag(value: Option<&str>) -> BrokerResult<bool> {
    match value.map(str::trim) {
        None | Some("") => Ok(false),
        Some(v) if v.eq_ignore_ascii_case("true") => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("false") => Ok(false),
        Some(other) => Err(BrokerError::InvalidRequest(format!(
            "forced_logon must be true or false, got {other}"
        ))),
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Creates a session and answers with the rid and the browser login URL.
#[instrument(skip(state, form), fields(app_id = ?form.app_id))]
pub async fn authenticate(state: &BrokerState, form: &ApiForm) -> BrokerResult<ApiReply> {
    let server = state.envelope.authority().as_str();
    let app_id = AppId::new(ApiForm::required(&form.app_id, "app_id")?);
    let app_url = ApiForm::required(&form.app_url, "app_url")?;
    let forced_logon = parse_flag(form.forced_logon.as_deref())?;
    let uid = non_blank(&form.uid);
    let country = non_blank(&form.country);
    let language = non_blank(&form.language);
    let remote_organization = non_blank(&form.remote_organization);

    let application = state.applications.get(&app_id)?;
    if !application.allows_return_url(app_url) {
        return Err(BrokerError::InvalidRequest(format!(
            "app_url not allowed for {app_id}"
        )));
    }

    let signed = SignedFields::authenticate_request(
        server,
        app_id.as_str(),
        app_url,
        forced_logon,
        uid,
        country,
        language,
        remote_organization,
    );
    check_signature(
        &state.envelope,
        app_id.as_str(),
        &signed,
        form.signature.as_deref(),
        application.require_signing,
    )?;

    let delegation = match remote_organization {
        Some(id) => {
            let organization = state.organizations.get(&OrganizationId::new(id))?;
            if !organization.accepts_delegation() {
                return Err(BrokerError::InvalidRequest(format!(
                    "organization {id} does not accept delegations"
                )));
            }
            Some(DelegationRecord {
                remote_organization: organization.id.clone(),
                remote_rid: None,
            })
        }
        None => None,
    };

    let mut session = SessionState::with_ttl(
        SessionOrigin::Application {
            app_id: app_id.clone(),
            return_url: app_url.to_string(),
        },
        application.level,
        state.config.session_ttl_seconds,
    );
    session.forced_uid = uid.map(str::to_string);
    session.forced_logon = forced_logon;
    session.country = country.map(str::to_string);
    session.language = language.map(str::to_string);
    session.sso_groups = application.sso_groups.clone();
    session.delegation = delegation;

    let rid = state
        .sessions
        .create(session)
        .await
        .map_err(BrokerError::Session)?;
    info!(rid = %rid, level = %application.level, "Authentication session created");

    Ok(ApiReply::new(ResultCode::Success)
        .field("rid", rid.as_str())
        .field("as_url", state.config.endpoint("/login"))
        .field("a-select-server", server))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forced_logon_flag() {
        assert!(!parse_flag(None).unwrap());
        assert!(!parse_flag(Some("")).unwrap());
        assert!(parse_flag(Some("TRUE")).unwrap());
        assert!(!parse_flag(Some("false")).unwrap());
        assert!(parse_flag(Some("yes")).is_err());
    }
}
