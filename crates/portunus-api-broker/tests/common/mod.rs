//! Common test utilities for broker integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use portunus_api_broker::{
    broker_router, ApplicationDescriptor, ApplicationRegistry, BrokerConfig, BrokerState,
    OrganizationDescriptor, OrganizationRegistry, CREDENTIALS_COOKIE,
};
use portunus_authsp::{
    AuthspBackend, AuthspDescriptor, AuthspRegistry, BackendConfig, BackendError, BackendVerdict,
    FailureHandling, VerifyRequest, PASSWORD_FIELD, RESPONSE_FIELD,
};
use portunus_core::{AttributeBag, AuthLevel, AuthorityId, AuthspId, OrganizationId};
use portunus_envelope::{
    AeadSealer, KeySigner, SealingKey, SignatureAlgorithm, SignedFields, SigningKey, TicketCipher,
    TrustEnvelope, TrustStore, VerificationKey,
};
use portunus_resources::{AlwaysAvailable, ResourceGroup, ResourceSelector};
use portunus_store::{InMemorySessionStore, InMemoryTicketStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub const BROKER: &str = "broker-a";
pub const ORGANIZATION: &str = "org-a";
pub const PEER: &str = "broker-b";
pub const APP: &str = "app1";
pub const PUBLIC_URL: &str = "https://sso-a.example.org";
pub const APP_URL: &str = "https://app.example.org/return";
pub const PEER_LOGIN_URL: &str = "https://sso-b.example.org/cross/login";
pub const PEER_RETURN_URL: &str = "https://sso-b.example.org/cross/return";
pub const PEER_GROUP: &str = "broker-b-api";

pub const BROKER_SECRET: [u8; 32] = [33u8; 32];
pub const APP_SECRET: [u8; 32] = [11u8; 32];
pub const PEER_SECRET: [u8; 32] = [22u8; 32];

/// Accepts `jane` / `secret` and releases a mail attribute.
pub struct ScriptedPassword;

#[async_trait]
impl AuthspBackend for ScriptedPassword {
    fn kind(&self) -> &'static str {
        "scripted-password"
    }

    async fn verify(&self, request: &VerifyRequest) -> Result<BackendVerdict, BackendError> {
        if request.uid == "jane" && request.field(PASSWORD_FIELD) == Some("secret") {
            Ok(BackendVerdict::Success(
                AttributeBag::new().with("mail", "jane@example.org"),
            ))
        } else {
            Ok(BackendVerdict::Fail)
        }
    }
}

/// Challenges once, then accepts the code `123456`.
pub struct ScriptedToken;

pub const TOKEN_HANDLE: &str = "handle-1";

#[async_trait]
impl AuthspBackend for ScriptedToken {
    fn kind(&self) -> &'static str {
        "scripted-token"
    }

    async fn verify(&self, request: &VerifyRequest) -> Result<BackendVerdict, BackendError> {
        match request.sub_session.as_deref() {
            None => Ok(BackendVerdict::Challenge {
                sub_session: TOKEN_HANDLE.to_string(),
                prompt: "Enter the code sent to your phone".to_string(),
            }),
            Some(TOKEN_HANDLE) if request.field(RESPONSE_FIELD) == Some("123456") => {
                Ok(BackendVerdict::SuccessNoContent)
            }
            Some(_) => Ok(BackendVerdict::Fail),
        }
    }
}

pub fn password_authsp(level: u32, allowed_retries: u32) -> AuthspDescriptor {
    AuthspDescriptor {
        id: AuthspId::new("password"),
        friendly_name: "Password".to_string(),
        level: AuthLevel(level),
        resource_group: None,
        required_keys: vec![PASSWORD_FIELD.to_string()],
        allowed_retries,
        failure_handling: FailureHandling::Local,
        next_authsp: None,
        direct: true,
        backend: BackendConfig::Password { users: vec![] },
    }
}

pub fn token_authsp(level: u32) -> AuthspDescriptor {
    AuthspDescriptor {
        id: AuthspId::new("token"),
        friendly_name: "One-time code".to_string(),
        level: AuthLevel(level),
        resource_group: None,
        required_keys: vec![],
        allowed_retries: 1,
        failure_handling: FailureHandling::Local,
        next_authsp: None,
        direct: true,
        backend: BackendConfig::Password { users: vec![] },
    }
}

/// What a test broker is built from.
pub struct Setup {
    pub authsps: Vec<(AuthspDescriptor, Arc<dyn AuthspBackend>)>,
    pub app_level: u32,
    pub single_sign_on: bool,
    /// Back-channel URL of the peer broker.
    pub peer_api: String,
    pub peer_failure_handling: FailureHandling,
    pub forced_authsp: Option<&'static str>,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            authsps: vec![(password_authsp(10, 1), Arc::new(ScriptedPassword))],
            app_level: 10,
            single_sign_on: true,
            peer_api: "http://127.0.0.1:9/api".to_string(),
            peer_failure_handling: FailureHandling::Local,
            forced_authsp: None,
        }
    }
}

/// Envelope of a party other than the broker under test.
pub fn party_envelope(authority: &str, secret: [u8; 32]) -> TrustEnvelope {
    let signer = KeySigner::new(
        AuthorityId::new(authority),
        SignatureAlgorithm::HmacSha256,
        SigningKey::hmac(secret.to_vec()).unwrap(),
        TrustStore::new(),
    )
    .unwrap();
    let sealer = AeadSealer::new(SealingKey::generate(TicketCipher::Aes256Gcm));
    TrustEnvelope::new(Arc::new(signer), Arc::new(sealer))
}

pub fn sign_as_app(fields: &SignedFields) -> String {
    party_envelope(APP, APP_SECRET).sign_fields(fields).unwrap()
}

pub fn sign_as_peer(fields: &SignedFields) -> String {
    party_envelope(PEER, PEER_SECRET).sign_fields(fields).unwrap()
}

fn broker_envelope() -> TrustEnvelope {
    let mut trust = TrustStore::new();
    trust.insert(
        AuthorityId::new(APP),
        VerificationKey::hmac(APP_SECRET.to_vec()).unwrap(),
    );
    trust.insert(
        AuthorityId::new(PEER),
        VerificationKey::hmac(PEER_SECRET.to_vec()).unwrap(),
    );
    let signer = KeySigner::new(
        AuthorityId::new(BROKER),
        SignatureAlgorithm::HmacSha256,
        SigningKey::hmac(BROKER_SECRET.to_vec()).unwrap(),
        trust,
    )
    .unwrap();
    let sealer = AeadSealer::new(SealingKey::generate(TicketCipher::Aes256Gcm));
    TrustEnvelope::new(Arc::new(signer), Arc::new(sealer))
}

pub fn create_test_state(setup: Setup) -> BrokerState {
    let mut config = BrokerConfig::new(
        AuthorityId::new(BROKER),
        OrganizationId::new(ORGANIZATION),
        PUBLIC_URL,
    );
    config.single_sign_on = setup.single_sign_on;

    let mut authsps = AuthspRegistry::default();
    for (descriptor, backend) in setup.authsps {
        authsps.insert(descriptor, backend).unwrap();
    }

    let application = ApplicationDescriptor {
        id: APP.into(),
        friendly_name: Some("Test application".to_string()),
        level: AuthLevel(setup.app_level),
        return_url_prefixes: vec!["https://app.example.org/".to_string()],
        require_signing: true,
        forced_authsp: setup.forced_authsp.map(AuthspId::new),
        sso_groups: vec![],
    };
    let applications = ApplicationRegistry::new(vec![application]).unwrap();

    let mut peer: OrganizationDescriptor = serde_json::from_value(serde_json::json!({
        "id": PEER,
        "friendly_name": "Broker B",
        "login_url": PEER_LOGIN_URL,
        "resource_group": PEER_GROUP,
        "return_url_prefixes": ["https://sso-b.example.org/"],
    }))
    .unwrap();
    peer.failure_handling = setup.peer_failure_handling;
    let organizations = OrganizationRegistry::new(vec![peer]).unwrap();

    let selector = ResourceSelector::new(
        vec![ResourceGroup::single(PEER_GROUP, setup.peer_api)],
        Arc::new(AlwaysAvailable),
        Duration::from_secs(30),
    );
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();

    BrokerState::new(
        config,
        broker_envelope(),
        Arc::new(InMemorySessionStore::new()),
        Arc::new(InMemoryTicketStore::new()),
        authsps,
        applications,
        organizations,
        selector,
        http,
    )
}

pub fn create_test_router(setup: Setup) -> Router {
    broker_router(create_test_state(setup))
}

/// Response parts the tests look at.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TestResponse {
    pub fn location(&self) -> String {
        self.headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    /// Value of the credentials cookie set by this response.
    pub fn credentials_cookie(&self) -> Option<String> {
        let set_cookie = self.headers.get(header::SET_COOKIE)?.to_str().ok()?;
        let (pair, _) = set_cookie.split_once(';')?;
        let (name, value) = pair.split_once('=')?;
        (name == CREDENTIALS_COOKIE && !value.is_empty()).then(|| value.to_string())
    }

    /// Value of a hidden form input.
    pub fn hidden(&self, name: &str) -> Option<String> {
        let marker = format!(r#"name="{name}" value=""#);
        let start = self.body.find(&marker)? + marker.len();
        let end = self.body[start..].find('"')?;
        Some(self.body[start..start + end].to_string())
    }

    pub fn form(&self) -> BTreeMap<String, String> {
        serde_urlencoded::from_str(&self.body).unwrap()
    }
}

pub fn query_param(location: &str, name: &str) -> Option<String> {
    let url = url::Url::parse(location).unwrap();
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

pub async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    TestResponse {
        status,
        headers,
        body: String::from_utf8(body.to_vec()).unwrap(),
    }
}

pub async fn get(router: &Router, uri: &str, cookie: Option<&str>) -> TestResponse {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, format!("{CREDENTIALS_COOKIE}={cookie}"));
    }
    send(router, builder.body(Body::empty()).unwrap()).await
}

pub async fn post_form(router: &Router, uri: &str, pairs: &[(&str, &str)]) -> TestResponse {
    let body = serde_urlencoded::to_string(pairs).unwrap();
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap();
    send(router, request).await
}

pub async fn api(router: &Router, pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    let response = post_form(router, "/api", pairs).await;
    assert_eq!(response.status, StatusCode::OK);
    response.form()
}

/// Signed `authenticate` request for the test application.
pub async fn authenticate_with(
    router: &Router,
    forced_logon: bool,
    remote_organization: Option<&str>,
) -> BTreeMap<String, String> {
    let signature = sign_as_app(&SignedFields::authenticate_request(
        BROKER,
        APP,
        APP_URL,
        forced_logon,
        None,
        None,
        None,
        remote_organization,
    ));
    let forced = if forced_logon { "true" } else { "false" };
    let mut pairs = vec![
        ("request", "authenticate"),
        ("a-select-server", BROKER),
        ("app_id", APP),
        ("app_url", APP_URL),
        ("forced_logon", forced),
        ("signature", signature.as_str()),
    ];
    if let Some(organization) = remote_organization {
        pairs.push(("remote_organization", organization));
    }
    api(router, &pairs).await
}

pub async fn authenticate(router: &Router) -> String {
    let reply = authenticate_with(router, false, None).await;
    assert_eq!(reply["result_code"], "0000");
    reply["rid"].clone()
}

/// Signed `verify_credentials` request for the test application.
pub async fn verify_credentials(
    router: &Router,
    rid: &str,
    credentials: &str,
) -> BTreeMap<String, String> {
    let signature = sign_as_app(&SignedFields::credentials(BROKER, rid, credentials));
    api(
        router,
        &[
            ("request", "verify_credentials"),
            ("a-select-server", BROKER),
            ("rid", rid),
            ("aselect_credentials", credentials),
            ("signature", signature.as_str()),
        ],
    )
    .await
}

/// Submits the currently rendered credential form.
pub async fn submit_form(
    router: &Router,
    form: &TestResponse,
    extra: &[(&str, &str)],
) -> TestResponse {
    let rid = form.hidden("rid").unwrap();
    let authsp = form.hidden("authsp").unwrap();
    let retry_counter = form.hidden("retry_counter").unwrap();
    let signature = form.hidden("signature").unwrap();
    let sub_session = form.hidden("sub_session");
    let mut pairs = vec![
        ("rid", rid.as_str()),
        ("authsp", authsp.as_str()),
        ("retry_counter", retry_counter.as_str()),
        ("signature", signature.as_str()),
    ];
    if let Some(handle) = sub_session.as_deref() {
        pairs.push(("sub_session", handle));
    }
    pairs.extend_from_slice(extra);
    post_form(router, "/login/credentials", &pairs).await
}

/// Runs a complete password login and returns the redirect back to the app.
pub async fn login_as_jane(router: &Router) -> (String, TestResponse) {
    let rid = authenticate(router).await;
    let form = get(router, &format!("/login?rid={rid}"), None).await;
    assert_eq!(form.status, StatusCode::OK);
    let redirect = submit_form(
        router,
        &form,
        &[("uid", "jane"), (PASSWORD_FIELD, "secret")],
    )
    .await;
    assert_eq!(redirect.status, StatusCode::FOUND);
    (rid, redirect)
}
