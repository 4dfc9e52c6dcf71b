//! Integration tests for the browser login flow.
//!
//! These tests drive `/login` and the credential forms through the router
//! and check what the application learns through `verify_credentials`.

use axum::http::StatusCode;
use portunus_authsp::PASSWORD_FIELD;
use std::sync::Arc;

mod common;
use common::*;

#[tokio::test]
async fn test_single_direct_authsp_renders_credential_form() {
    let router = create_test_router(Setup::default());
    let rid = authenticate(&router).await;

    let form = get(&router, &format!("/login?rid={rid}"), None).await;

    assert_eq!(form.status, StatusCode::OK);
    assert!(form.body.contains(r#"name="password""#));
    assert!(form.body.contains(r#"type="password""#));
    assert_eq!(form.hidden("rid").as_deref(), Some(rid.as_str()));
    assert!(form.hidden("retry_counter").unwrap().starts_with("1:"));
}

#[tokio::test]
async fn test_several_authsps_render_selection_form() {
    let router = create_test_router(Setup {
        authsps: vec![
            (password_authsp(10, 1), Arc::new(ScriptedPassword)),
            (token_authsp(30), Arc::new(ScriptedToken)),
        ],
        ..Setup::default()
    });
    let rid = authenticate(&router).await;

    let page = get(&router, &format!("/login?rid={rid}"), None).await;

    assert_eq!(page.status, StatusCode::OK);
    assert!(page.body.contains("Password"));
    assert!(page.body.contains("One-time code"));

    let form = post_form(
        &router,
        "/login/authsp",
        &[("rid", rid.as_str()), ("authsp", "token")],
    )
    .await;
    assert_eq!(form.status, StatusCode::OK);
    assert_eq!(form.hidden("authsp").as_deref(), Some("token"));
}

#[tokio::test]
async fn test_password_login_redirects_with_signed_credentials() {
    let router = create_test_router(Setup::default());
    let (rid, redirect) = login_as_jane(&router).await;

    let location = redirect.location();
    assert!(location.starts_with(APP_URL));
    assert_eq!(query_param(&location, "rid").as_deref(), Some(rid.as_str()));
    assert_eq!(
        query_param(&location, "a-select-server").as_deref(),
        Some(BROKER)
    );
    assert!(query_param(&location, "signature").is_some());
    let credentials = query_param(&location, "aselect_credentials").unwrap();
    assert_eq!(redirect.credentials_cookie().as_deref(), Some(credentials.as_str()));

    let reply = verify_credentials(&router, &rid, &credentials).await;
    assert_eq!(reply["result_code"], "0000");
    assert_eq!(reply["uid"], "jane");
    assert_eq!(reply["organization"], ORGANIZATION);
    assert_eq!(reply["authsp"], "password");
    assert_eq!(reply["authsp_level"], "10");
    assert_eq!(reply["app_level"], "10");
    assert!(reply.contains_key("attributes"));
    assert!(reply.contains_key("signature"));
    assert!(reply["tgt_exp_time"].parse::<i64>().is_ok());
}

#[tokio::test]
async fn test_ticket_survives_verification_with_single_sign_on() {
    let router = create_test_router(Setup::default());
    let (rid, redirect) = login_as_jane(&router).await;
    let credentials = query_param(&redirect.location(), "aselect_credentials").unwrap();

    let first = verify_credentials(&router, &rid, &credentials).await;
    let second = verify_credentials(&router, &rid, &credentials).await;

    assert_eq!(first["result_code"], "0000");
    assert_eq!(second["result_code"], "0000");
    for key in ["uid", "organization", "authsp", "authsp_level", "app_level", "attributes"] {
        assert_eq!(first.get(key), second.get(key), "{key} changed between verifications");
    }
    let first_exp: i64 = first["tgt_exp_time"].parse().unwrap();
    let second_exp: i64 = second["tgt_exp_time"].parse().unwrap();
    assert!(second_exp >= first_exp);
}

#[tokio::test]
async fn test_ticket_is_consumed_without_single_sign_on() {
    let router = create_test_router(Setup {
        single_sign_on: false,
        ..Setup::default()
    });
    let (rid, redirect) = login_as_jane(&router).await;
    assert!(redirect.credentials_cookie().is_none());
    let credentials = query_param(&redirect.location(), "aselect_credentials").unwrap();

    let first = verify_credentials(&router, &rid, &credentials).await;
    let second = verify_credentials(&router, &rid, &credentials).await;

    assert_eq!(first["result_code"], "0000");
    assert_eq!(second["result_code"], "0006");
}

#[tokio::test]
async fn test_wrong_password_reprompts_then_denies() {
    let router = create_test_router(Setup::default());
    let rid = authenticate(&router).await;
    let form = get(&router, &format!("/login?rid={rid}"), None).await;

    let retry = submit_form(&router, &form, &[("uid", "jane"), (PASSWORD_FIELD, "wrong")]).await;
    assert_eq!(retry.status, StatusCode::OK);
    assert!(retry.hidden("retry_counter").unwrap().starts_with("2:"));
    assert!(retry.body.contains("Invalid credentials"));

    let denied = submit_form(&router, &retry, &[("uid", "jane"), (PASSWORD_FIELD, "wrong")]).await;
    assert_eq!(denied.status, StatusCode::FOUND);
    assert!(denied.credentials_cookie().is_none());

    let credentials = query_param(&denied.location(), "aselect_credentials").unwrap();
    let reply = verify_credentials(&router, &rid, &credentials).await;
    assert_eq!(reply["result_code"], "0400");
    assert_eq!(reply["rid"], rid);
}

#[tokio::test]
async fn test_blank_password_does_not_consume_a_retry() {
    let router = create_test_router(Setup::default());
    let rid = authenticate(&router).await;
    let form = get(&router, &format!("/login?rid={rid}"), None).await;

    let again = submit_form(&router, &form, &[("uid", "jane"), (PASSWORD_FIELD, "  ")]).await;

    assert_eq!(again.status, StatusCode::OK);
    assert!(again.hidden("retry_counter").unwrap().starts_with("1:"));
    assert!(again.body.contains("Please fill in all fields"));
}

#[tokio::test]
async fn test_tampered_retry_counter_ends_attempt() {
    let router = create_test_router(Setup::default());
    let rid = authenticate(&router).await;
    let form = get(&router, &format!("/login?rid={rid}"), None).await;
    let signature = form.hidden("signature").unwrap();

    let tampered = post_form(
        &router,
        "/login/credentials",
        &[
            ("rid", rid.as_str()),
            ("authsp", "password"),
            ("retry_counter", "1:forged"),
            ("signature", signature.as_str()),
            ("uid", "jane"),
            (PASSWORD_FIELD, "secret"),
        ],
    )
    .await;

    assert_eq!(tampered.status, StatusCode::BAD_REQUEST);
    assert!(tampered.body.contains("0030"));

    let reload = get(&router, &format!("/login?rid={rid}"), None).await;
    assert!(reload.body.contains("0102"));
}

#[tokio::test]
async fn test_cancel_sends_cancel_ticket_to_application() {
    let router = create_test_router(Setup::default());
    let rid = authenticate(&router).await;
    let form = get(&router, &format!("/login?rid={rid}"), None).await;

    let cancelled = submit_form(&router, &form, &[("cancel", "Cancel")]).await;

    assert_eq!(cancelled.status, StatusCode::FOUND);
    let credentials = query_param(&cancelled.location(), "aselect_credentials").unwrap();
    let reply = verify_credentials(&router, &rid, &credentials).await;
    assert_eq!(reply["result_code"], "0401");
}

#[tokio::test]
async fn test_challenge_round_completes_login() {
    let router = create_test_router(Setup {
        authsps: vec![(token_authsp(30), Arc::new(ScriptedToken))],
        app_level: 30,
        ..Setup::default()
    });
    let rid = authenticate(&router).await;
    let form = get(&router, &format!("/login?rid={rid}"), None).await;
    assert_eq!(form.hidden("authsp").as_deref(), Some("token"));

    let challenge = submit_form(&router, &form, &[("uid", "jane")]).await;
    assert_eq!(challenge.status, StatusCode::OK);
    assert_eq!(challenge.hidden("sub_session").as_deref(), Some(TOKEN_HANDLE));
    assert!(challenge.body.contains("Enter the code sent to your phone"));

    let redirect = submit_form(&router, &challenge, &[("response", "123456")]).await;
    assert_eq!(redirect.status, StatusCode::FOUND);

    let credentials = query_param(&redirect.location(), "aselect_credentials").unwrap();
    let reply = verify_credentials(&router, &rid, &credentials).await;
    assert_eq!(reply["result_code"], "0000");
    assert_eq!(reply["authsp"], "token");
    assert_eq!(reply["authsp_level"], "30");
    assert!(!reply.contains_key("attributes"));
}

#[tokio::test]
async fn test_forged_sub_session_is_rejected() {
    let router = create_test_router(Setup {
        authsps: vec![(token_authsp(30), Arc::new(ScriptedToken))],
        app_level: 30,
        ..Setup::default()
    });
    let rid = authenticate(&router).await;
    let form = get(&router, &format!("/login?rid={rid}"), None).await;
    let challenge = submit_form(&router, &form, &[("uid", "jane")]).await;

    let forged = post_form(
        &router,
        "/login/credentials",
        &[
            ("rid", rid.as_str()),
            ("authsp", "token"),
            ("retry_counter", challenge.hidden("retry_counter").unwrap().as_str()),
            ("signature", challenge.hidden("signature").unwrap().as_str()),
            ("sub_session", "handle-2"),
            ("response", "123456"),
        ],
    )
    .await;

    assert_eq!(forged.status, StatusCode::BAD_REQUEST);
    assert!(forged.body.contains("0030"));
}

#[tokio::test]
async fn test_single_sign_on_cookie_skips_the_form() {
    let router = create_test_router(Setup::default());
    let (_, redirect) = login_as_jane(&router).await;
    let cookie = redirect.credentials_cookie().unwrap();

    let rid = authenticate(&router).await;
    let reused = get(&router, &format!("/login?rid={rid}"), Some(&cookie)).await;

    assert_eq!(reused.status, StatusCode::FOUND);
    let location = reused.location();
    assert_eq!(query_param(&location, "rid").as_deref(), Some(rid.as_str()));
    let credentials = query_param(&location, "aselect_credentials").unwrap();
    let reply = verify_credentials(&router, &rid, &credentials).await;
    assert_eq!(reply["result_code"], "0000");
    assert_eq!(reply["uid"], "jane");
}

#[tokio::test]
async fn test_forced_logon_ignores_cookie() {
    let router = create_test_router(Setup::default());
    let (_, redirect) = login_as_jane(&router).await;
    let cookie = redirect.credentials_cookie().unwrap();

    let reply = authenticate_with(&router, true, None).await;
    let rid = reply["rid"].clone();
    let page = get(&router, &format!("/login?rid={rid}"), Some(&cookie)).await;

    assert_eq!(page.status, StatusCode::OK);
    assert!(page.body.contains(r#"name="password""#));
}

#[tokio::test]
async fn test_no_authsp_for_level_shows_error_page() {
    let router = create_test_router(Setup {
        app_level: 50,
        ..Setup::default()
    });
    let rid = authenticate(&router).await;

    let page = get(&router, &format!("/login?rid={rid}"), None).await;

    assert_eq!(page.status, StatusCode::BAD_REQUEST);
    assert!(page.body.contains("0007"));
}

#[tokio::test]
async fn test_unknown_rid_shows_error_page() {
    let router = create_test_router(Setup::default());

    let page = get(&router, "/login?rid=doesnotexist", None).await;

    assert!(page.status.is_client_error());
    assert!(page.body.contains("Login failed"));
}

#[tokio::test]
async fn test_logout_clears_cookie_and_ticket() {
    let router = create_test_router(Setup::default());
    let (rid, redirect) = login_as_jane(&router).await;
    let cookie = redirect.credentials_cookie().unwrap();
    let credentials = query_param(&redirect.location(), "aselect_credentials").unwrap();

    let page = get(&router, "/logout", Some(&cookie)).await;

    assert_eq!(page.status, StatusCode::OK);
    assert!(page.body.contains("logged out"));
    let set_cookie = page.headers["set-cookie"].to_str().unwrap();
    assert!(set_cookie.contains("Max-Age=0"));

    let reply = verify_credentials(&router, &rid, &credentials).await;
    assert_eq!(reply["result_code"], "0006");
}

#[tokio::test]
async fn test_chained_authsps_raise_the_level() {
    let mut password = password_authsp(10, 1);
    password.next_authsp = Some(portunus_core::AuthspId::new("token"));
    let router = create_test_router(Setup {
        authsps: vec![
            (password, Arc::new(ScriptedPassword)),
            (token_authsp(30), Arc::new(ScriptedToken)),
        ],
        ..Setup::default()
    });
    let rid = authenticate(&router).await;
    let form = post_form(
        &router,
        "/login/authsp",
        &[("rid", rid.as_str()), ("authsp", "password")],
    )
    .await;

    let chained = submit_form(&router, &form, &[("uid", "jane"), (PASSWORD_FIELD, "secret")]).await;
    assert_eq!(chained.status, StatusCode::OK);
    assert!(chained.body.contains("document.forms[0].submit()"));
    assert_eq!(chained.hidden("authsp").as_deref(), Some("token"));
    assert!(chained.credentials_cookie().is_none());

    let token_form = post_form(
        &router,
        "/login/authsp",
        &[
            ("rid", chained.hidden("rid").unwrap().as_str()),
            ("authsp", "token"),
        ],
    )
    .await;
    let challenge = submit_form(&router, &token_form, &[("uid", "jane")]).await;
    let redirect = submit_form(&router, &challenge, &[("response", "123456")]).await;
    assert_eq!(redirect.status, StatusCode::FOUND);

    let credentials = query_param(&redirect.location(), "aselect_credentials").unwrap();
    let reply = verify_credentials(&router, &rid, &credentials).await;
    assert_eq!(reply["result_code"], "0000");
    assert_eq!(reply["uid"], "jane");
    assert_eq!(reply["authsp_level"], "30");
    assert!(reply.contains_key("attributes"));
}

fn other_authsp() -> portunus_authsp::AuthspDescriptor {
    let mut other = password_authsp(10, 1);
    other.id = portunus_core::AuthspId::new("other");
    other.friendly_name = "Other password".to_string();
    other
}

#[tokio::test]
async fn test_reselecting_authsp_keeps_retry_counter() {
    let router = create_test_router(Setup {
        authsps: vec![
            (password_authsp(10, 1), Arc::new(ScriptedPassword)),
            (token_authsp(30), Arc::new(ScriptedToken)),
        ],
        ..Setup::default()
    });
    let rid = authenticate(&router).await;
    let choose = [("rid", rid.as_str()), ("authsp", "password")];
    let form = post_form(&router, "/login/authsp", &choose).await;

    let retry = submit_form(&router, &form, &[("uid", "jane"), (PASSWORD_FIELD, "wrong")]).await;
    assert!(retry.hidden("retry_counter").unwrap().starts_with("2:"));

    let reselected = post_form(&router, "/login/authsp", &choose).await;
    assert_eq!(reselected.status, StatusCode::OK);
    assert!(reselected.hidden("retry_counter").unwrap().starts_with("2:"));

    let denied =
        submit_form(&router, &reselected, &[("uid", "jane"), (PASSWORD_FIELD, "wrong")]).await;
    assert_eq!(denied.status, StatusCode::FOUND);
    let credentials = query_param(&denied.location(), "aselect_credentials").unwrap();
    let reply = verify_credentials(&router, &rid, &credentials).await;
    assert_eq!(reply["result_code"], "0400");
}

#[tokio::test]
async fn test_chain_cannot_switch_to_another_authsp() {
    let mut password = password_authsp(10, 1);
    password.next_authsp = Some(portunus_core::AuthspId::new("token"));
    let router = create_test_router(Setup {
        authsps: vec![
            (password, Arc::new(ScriptedPassword)),
            (token_authsp(30), Arc::new(ScriptedToken)),
            (other_authsp(), Arc::new(ScriptedPassword)),
        ],
        ..Setup::default()
    });
    let rid = authenticate(&router).await;
    let form = post_form(
        &router,
        "/login/authsp",
        &[("rid", rid.as_str()), ("authsp", "password")],
    )
    .await;
    let chained = submit_form(&router, &form, &[("uid", "jane"), (PASSWORD_FIELD, "secret")]).await;
    assert_eq!(chained.hidden("authsp").as_deref(), Some("token"));
    let token_form = post_form(
        &router,
        "/login/authsp",
        &[("rid", rid.as_str()), ("authsp", "token")],
    )
    .await;
    assert_eq!(token_form.status, StatusCode::OK);

    let switched = post_form(
        &router,
        "/login/authsp",
        &[("rid", rid.as_str()), ("authsp", "other")],
    )
    .await;

    assert_eq!(switched.status, StatusCode::BAD_REQUEST);
    assert!(switched.body.contains("0030"));
    assert!(switched.location().is_empty());
    let reload = get(&router, &format!("/login?rid={rid}"), None).await;
    assert!(reload.body.contains("0102"));
}

#[tokio::test]
async fn test_forced_authsp_cannot_be_bypassed() {
    let router = create_test_router(Setup {
        authsps: vec![
            (password_authsp(10, 1), Arc::new(ScriptedPassword)),
            (other_authsp(), Arc::new(ScriptedPassword)),
        ],
        forced_authsp: Some("password"),
        ..Setup::default()
    });
    let rid = authenticate(&router).await;
    let form = get(&router, &format!("/login?rid={rid}"), None).await;
    assert_eq!(form.hidden("authsp").as_deref(), Some("password"));

    let switched = post_form(
        &router,
        "/login/authsp",
        &[("rid", rid.as_str()), ("authsp", "other")],
    )
    .await;

    assert_eq!(switched.status, StatusCode::BAD_REQUEST);
    assert!(switched.body.contains("0030"));
}
