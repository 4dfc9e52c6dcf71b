//! The AuthSP delegation handshake.
//!
//! ```text
//! INIT -> AWAITING_CREDENTIALS -> VERIFYING -> SUCCESS
//!                ^     ^              |------> CHAINING -> INIT (next AuthSP)
//!                |     '---- RETRY ---|
//!                '------- CHALLENGE --|
//!                                     '------> FAIL
//! ```
//!
//! The handshake only mutates a [`SessionState`] in memory. Loading and
//! storing the session around each step, and the backend call itself, are
//! the caller's job, so no store lock is ever held across the network.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use portunus_core::{AuthspId, OrganizationId, ResultCode};
use portunus_envelope::{SignedFields, TrustEnvelope};
use portunus_store::{Authenticated, AuthspSlot, HandshakeState, SessionState};
use rand::RngCore;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::backend::{BackendVerdict, RequestFields, VerifyRequest, RESPONSE_FIELD};
use crate::descriptor::AuthspDescriptor;
use crate::error::{AuthspError, AuthspResult, BackendError};

const FORM_TOKEN_BYTES: usize = 16;

/// Everything a credential form needs to carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPrompt {
    pub authsp: AuthspId,
    /// `<n>:<token>`
    pub retry_counter: String,
    pub signature: String,
    /// Uid the form is locked to, if any.
    pub uid: Option<String>,
    /// Challenge round data.
    pub sub_session: Option<String>,
    pub challenge: Option<String>,
    /// Validation or failure message to show above the form.
    pub message: Option<String>,
}

/// A browser submission of a credential form.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub authsp: Option<AuthspId>,
    pub retry_counter: String,
    pub signature: String,
    pub uid: Option<String>,
    pub sub_session: Option<String>,
    pub fields: RequestFields,
}

/// Result of accepting a submission.
#[derive(Debug, Clone)]
pub enum Prepared {
    /// Something required was blank; re-render without consuming a retry.
    Incomplete(CredentialPrompt),
    /// Ready for the backend. The resource has not been selected yet.
    Ready(VerifyRequest),
}

/// What the caller does next after a backend verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Authentication complete; hand over to the ticket issuer.
    Authenticated(Authenticated),
    /// Re-enter INIT for the next AuthSP of the chain.
    Chain { next: AuthspId },
    /// Credentials rejected, another attempt is allowed.
    Retry(CredentialPrompt),
    /// The backend wants another round.
    Challenge(CredentialPrompt),
    /// Terminal failure.
    Failed(ResultCode),
}

/// Drives the handshake for one broker.
#[derive(Debug, Clone)]
pub struct Handshake {
    envelope: TrustEnvelope,
    organization: OrganizationId,
}

impl Handshake {
    #[must_use]
    pub fn new(envelope: TrustEnvelope, organization: OrganizationId) -> Self {
        Self {
            envelope,
            organization,
        }
    }

    /// INIT: start the handshake for `descriptor`.
    ///
    /// Selecting an AuthSP that already has a form re-renders that form with
    /// its current counter. Once a chain has started, or a challenge is
    /// open, only the current AuthSP may be selected.
    pub fn begin(
        &self,
        session: &mut SessionState,
        descriptor: &AuthspDescriptor,
    ) -> AuthspResult<CredentialPrompt> {
        match session.state {
            HandshakeState::Init
            | HandshakeState::AwaitingCredentials
            | HandshakeState::Challenge => {
                let chained = !session.chain.is_empty();
                let locked = chained || session.state == HandshakeState::Challenge;
                if locked && session.authsp.as_ref() != Some(&descriptor.id) {
                    return Err(AuthspError::InvalidRequest(format!(
                        "AuthSP {} cannot replace the current AuthSP",
                        descriptor.id
                    )));
                }
                if !chained && !descriptor.level.satisfies(session.required_level) {
                    return Err(AuthspError::LevelNotAvailable(session.required_level.0));
                }
            }
            HandshakeState::Chaining => {
                if session.authsp.as_ref() != Some(&descriptor.id) {
                    return Err(AuthspError::InvalidRequest(format!(
                        "AuthSP {} is not the next in the chain",
                        descriptor.id
                    )));
                }
            }
            other => {
                return Err(AuthspError::InvalidRequest(format!(
                    "Cannot start an AuthSP in state {other:?}"
                )));
            }
        }

        session.authsp = Some(descriptor.id.clone());
        if let Some(slot) = session.slots.get(&descriptor.id) {
            session.state = if slot.sub_session.is_some() {
                HandshakeState::Challenge
            } else {
                HandshakeState::AwaitingCredentials
            };
            debug!(authsp = %descriptor.id, counter = slot.retry_counter, "Credential form re-issued");
            return self.prompt(session, &descriptor.id, None);
        }
        session
            .slots
            .insert(descriptor.id.clone(), AuthspSlot::first(new_form_token()));
        session.state = HandshakeState::AwaitingCredentials;
        debug!(authsp = %descriptor.id, "Credential form issued");
        self.prompt(session, &descriptor.id, None)
    }

    /// AWAITING_CREDENTIALS -> VERIFYING: check the anti-replay data and the
    /// required keys of a submission.
    pub fn accept(
        &self,
        session: &mut SessionState,
        descriptor: &AuthspDescriptor,
        submission: &Submission,
    ) -> AuthspResult<Prepared> {
        if !matches!(
            session.state,
            HandshakeState::AwaitingCredentials | HandshakeState::Challenge
        ) {
            return Err(AuthspError::InvalidRequest(
                "No credentials expected".to_string(),
            ));
        }
        if session.authsp.as_ref() != Some(&descriptor.id)
            || submission
                .authsp
                .as_ref()
                .is_some_and(|id| id != &descriptor.id)
        {
            return Err(AuthspError::InvalidRequest(
                "Submission for another AuthSP".to_string(),
            ));
        }

        let signed = SignedFields::retry_counter(
            self.envelope.authority().as_str(),
            session.requester_key(),
            &submission.retry_counter,
        );
        if !self.envelope.verify_fields(
            self.envelope.authority(),
            &signed,
            &submission.signature,
        ) {
            return Err(AuthspError::InvalidRequest(
                "Retry counter signature mismatch".to_string(),
            ));
        }

        let slot = session
            .slots
            .get(&descriptor.id)
            .ok_or_else(|| AuthspError::InvalidRequest("No form issued".to_string()))?;
        check_counter(slot, &submission.retry_counter)?;
        check_sub_session(slot, submission.sub_session.as_deref())?;

        let in_challenge = slot.sub_session.is_some();
        let uid = if in_challenge {
            slot.uid.clone()
        } else {
            session.forced_uid.clone().or_else(|| {
                submission
                    .uid
                    .as_deref()
                    .map(str::trim)
                    .filter(|uid| !uid.is_empty())
                    .map(str::to_string)
            })
        };

        let required: Vec<&str> = if in_challenge {
            vec![RESPONSE_FIELD]
        } else {
            descriptor.required_keys.iter().map(String::as_str).collect()
        };
        let blank = required.iter().any(|key| {
            submission
                .fields
                .get(*key)
                .map_or(true, |value| value.trim().is_empty())
        });

        let Some(uid) = uid.filter(|_| !blank) else {
            debug!(authsp = %descriptor.id, "Incomplete credential submission");
            let prompt = self.prompt(
                session,
                &descriptor.id,
                Some("Please fill in all fields".to_string()),
            )?;
            return Ok(Prepared::Incomplete(prompt));
        };

        let sub_session = slot.sub_session.clone();
        if let Some(slot) = session.slots.get_mut(&descriptor.id) {
            // The submitted token is spent.
            slot.form_token = new_form_token();
        }
        session.state = HandshakeState::Verifying;

        Ok(Prepared::Ready(VerifyRequest {
            authsp: descriptor.id.clone(),
            uid,
            fields: submission.fields.clone(),
            sub_session,
            resource: None,
        }))
    }

    /// VERIFYING -> next state, given the backend outcome.
    pub fn conclude(
        &self,
        session: &mut SessionState,
        descriptor: &AuthspDescriptor,
        request: &VerifyRequest,
        outcome: Result<BackendVerdict, BackendError>,
    ) -> AuthspResult<HandshakeStep> {
        if session.state != HandshakeState::Verifying
            || session.authsp.as_ref() != Some(&descriptor.id)
        {
            return Err(AuthspError::InvalidRequest(
                "Session is not verifying this AuthSP".to_string(),
            ));
        }

        let verdict = match outcome {
            Ok(verdict) => verdict,
            Err(e) => {
                let code = AuthspError::from(e.clone()).result_code();
                warn!(authsp = %descriptor.id, error = %e, "AuthSP backend failed");
                session.fail(code);
                return Ok(HandshakeStep::Failed(code));
            }
        };

        match verdict {
            BackendVerdict::Success(attributes) => {
                Ok(self.succeed(session, descriptor, &request.uid, attributes))
            }
            BackendVerdict::SuccessNoContent => {
                Ok(self.succeed(session, descriptor, &request.uid, Default::default()))
            }
            BackendVerdict::Challenge {
                sub_session,
                prompt,
            } => {
                let slot = self.slot_mut(session, &descriptor.id)?;
                slot.sub_session = Some(sub_session);
                slot.challenge = Some(prompt);
                slot.uid = Some(request.uid.clone());
                session.state = HandshakeState::Challenge;
                Ok(HandshakeStep::Challenge(self.prompt(
                    session,
                    &descriptor.id,
                    None,
                )?))
            }
            BackendVerdict::Fail => {
                let slot = self.slot_mut(session, &descriptor.id)?;
                if slot.retry_counter > descriptor.allowed_retries {
                    session.fail(ResultCode::AuthspAccessDenied);
                    return Ok(HandshakeStep::Failed(ResultCode::AuthspAccessDenied));
                }
                slot.retry_counter += 1;
                slot.form_token = new_form_token();
                slot.clear_challenge();
                session.state = HandshakeState::AwaitingCredentials;
                Ok(HandshakeStep::Retry(self.prompt(
                    session,
                    &descriptor.id,
                    Some("Invalid credentials, please try again".to_string()),
                )?))
            }
        }
    }

    /// Re-signs the current form of `authsp` without changing the slot.
    pub fn current_prompt(
        &self,
        session: &SessionState,
        authsp: &AuthspId,
    ) -> AuthspResult<CredentialPrompt> {
        self.prompt(session, authsp, None)
    }

    fn succeed(
        &self,
        session: &mut SessionState,
        descriptor: &AuthspDescriptor,
        uid: &str,
        attributes: portunus_core::AttributeBag,
    ) -> HandshakeStep {
        session.slots.remove(&descriptor.id);
        session.chain.push(descriptor.id.clone());

        let authenticated = match session.authenticated.take() {
            Some(mut previous) => {
                previous.attributes.union(&attributes);
                previous.level = previous.level.max(descriptor.level);
                previous.authsp = descriptor.id.clone();
                previous
            }
            None => Authenticated {
                uid: uid.to_string(),
                organization: self.organization.clone(),
                authsp: descriptor.id.clone(),
                level: descriptor.level,
                attributes,
            },
        };
        session.authenticated = Some(authenticated.clone());

        match &descriptor.next_authsp {
            Some(next) => {
                session.forced_uid = Some(authenticated.uid);
                session.authsp = Some(next.clone());
                session.state = HandshakeState::Chaining;
                debug!(authsp = %descriptor.id, next = %next, "Chaining to next AuthSP");
                HandshakeStep::Chain { next: next.clone() }
            }
            None => {
                session.state = HandshakeState::Success;
                HandshakeStep::Authenticated(authenticated)
            }
        }
    }

    fn slot_mut<'a>(
        &self,
        session: &'a mut SessionState,
        authsp: &AuthspId,
    ) -> AuthspResult<&'a mut AuthspSlot> {
        session
            .slots
            .get_mut(authsp)
            .ok_or_else(|| AuthspError::InvalidRequest("No form issued".to_string()))
    }

    fn prompt(
        &self,
        session: &SessionState,
        authsp: &AuthspId,
        message: Option<String>,
    ) -> AuthspResult<CredentialPrompt> {
        let slot = session
            .slots
            .get(authsp)
            .ok_or_else(|| AuthspError::InvalidRequest("No form issued".to_string()))?;
        let retry_counter = slot.wire_counter();
        let signature = self.envelope.sign_fields(&SignedFields::retry_counter(
            self.envelope.authority().as_str(),
            session.requester_key(),
            &retry_counter,
        ))?;
        Ok(CredentialPrompt {
            authsp: authsp.clone(),
            retry_counter,
            signature,
            uid: session.forced_uid.clone().or_else(|| slot.uid.clone()),
            sub_session: slot.sub_session.clone(),
            challenge: slot.challenge.clone(),
            message,
        })
    }
}

fn new_form_token() -> String {
    let mut bytes = [0u8; FORM_TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn check_counter(slot: &AuthspSlot, wire: &str) -> AuthspResult<()> {
    let invalid = || AuthspError::InvalidRequest("Retry counter mismatch".to_string());
    let (counter, token) = wire.split_once(':').ok_or_else(invalid)?;
    let counter: u32 = counter.parse().map_err(|_| invalid())?;
    let token_matches: bool = token.as_bytes().ct_eq(slot.form_token.as_bytes()).into();
    if counter != slot.retry_counter || !token_matches {
        return Err(invalid());
    }
    Ok(())
}

fn check_sub_session(slot: &AuthspSlot, submitted: Option<&str>) -> AuthspResult<()> {
    let submitted = submitted.filter(|h| !h.is_empty());
    let matches = match (slot.sub_session.as_deref(), submitted) {
        (None, None) => true,
        (Some(expected), Some(given)) => expected.as_bytes().ct_eq(given.as_bytes()).into(),
        _ => false,
    };
    if matches {
        Ok(())
    } else {
        Err(AuthspError::InvalidRequest(
            "Sub-session handle mismatch".to_string(),
        ))
    }
}
