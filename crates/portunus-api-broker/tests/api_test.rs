//! Integration tests for the `/api` back-channel and the health endpoint.

use axum::{body::Body, http::Request, http::StatusCode};
use portunus_envelope::SignedFields;

mod common;
use common::*;

#[tokio::test]
async fn test_authenticate_returns_rid_and_login_url() {
    let router = create_test_router(Setup::default());

    let reply = authenticate_with(&router, false, None).await;

    assert_eq!(reply["result_code"], "0000");
    assert!(!reply["rid"].is_empty());
    assert_eq!(reply["as_url"], "https://sso-a.example.org/login");
    assert_eq!(reply["a-select-server"], BROKER);
}

#[tokio::test]
async fn test_unsigned_authenticate_is_rejected() {
    let router = create_test_router(Setup::default());

    let reply = api(
        &router,
        &[
            ("request", "authenticate"),
            ("a-select-server", BROKER),
            ("app_id", APP),
            ("app_url", APP_URL),
        ],
    )
    .await;

    assert_eq!(reply["result_code"], "0030");
}

#[tokio::test]
async fn test_authenticate_for_unknown_application() {
    let router = create_test_router(Setup::default());

    let reply = api(
        &router,
        &[
            ("request", "authenticate"),
            ("a-select-server", BROKER),
            ("app_id", "nope"),
            ("app_url", APP_URL),
        ],
    )
    .await;

    assert_eq!(reply["result_code"], "0008");
}

#[tokio::test]
async fn test_authenticate_rejects_foreign_return_url() {
    let router = create_test_router(Setup::default());
    let app_url = "https://evil.example.com/return";
    let signature = sign_as_app(&SignedFields::authenticate_request(
        BROKER, APP, app_url, false, None, None, None, None,
    ));

    let reply = api(
        &router,
        &[
            ("request", "authenticate"),
            ("a-select-server", BROKER),
            ("app_id", APP),
            ("app_url", app_url),
            ("signature", signature.as_str()),
        ],
    )
    .await;

    assert_eq!(reply["result_code"], "0030");
}

#[tokio::test]
async fn test_request_for_another_broker_is_rejected() {
    let router = create_test_router(Setup::default());

    let reply = api(
        &router,
        &[
            ("request", "get_app_level"),
            ("a-select-server", "broker-z"),
            ("app_id", APP),
        ],
    )
    .await;

    assert_eq!(reply["result_code"], "0030");
}

#[tokio::test]
async fn test_unknown_request_name() {
    let router = create_test_router(Setup::default());

    let reply = api(&router, &[("request", "dance"), ("a-select-server", BROKER)]).await;

    assert_eq!(reply["result_code"], "0030");
}

#[tokio::test]
async fn test_get_app_level() {
    let router = create_test_router(Setup::default());
    let signature = sign_as_app(&SignedFields::get_app_level(BROKER, APP));

    let reply = api(
        &router,
        &[
            ("request", "get_app_level"),
            ("a-select-server", BROKER),
            ("app_id", APP),
            ("signature", signature.as_str()),
        ],
    )
    .await;

    assert_eq!(reply["result_code"], "0000");
    assert_eq!(reply["app_level"], "10");
}

#[tokio::test]
async fn test_verify_with_garbage_credentials() {
    let router = create_test_router(Setup::default());
    let rid = authenticate(&router).await;

    let reply = verify_credentials(&router, &rid, "not-a-ticket").await;

    assert_eq!(reply["result_code"], "0005");
    assert_eq!(reply["rid"], rid);
}

#[tokio::test]
async fn test_verify_for_another_rid_is_rejected() {
    let router = create_test_router(Setup::default());
    let (_, redirect) = login_as_jane(&router).await;
    let credentials = query_param(&redirect.location(), "aselect_credentials").unwrap();
    let other_rid = authenticate(&router).await;

    let reply = verify_credentials(&router, &other_rid, &credentials).await;

    assert_eq!(reply["result_code"], "0005");
}

#[tokio::test]
async fn test_verify_with_bad_signature() {
    let router = create_test_router(Setup::default());
    let (rid, redirect) = login_as_jane(&router).await;
    let credentials = query_param(&redirect.location(), "aselect_credentials").unwrap();
    let signature = sign_as_app(&SignedFields::credentials(BROKER, "other", &credentials));

    let reply = api(
        &router,
        &[
            ("request", "verify_credentials"),
            ("a-select-server", BROKER),
            ("rid", rid.as_str()),
            ("aselect_credentials", credentials.as_str()),
            ("signature", signature.as_str()),
        ],
    )
    .await;

    assert_eq!(reply["result_code"], "0030");
}

#[tokio::test]
async fn test_kill_tgt_ends_single_sign_on() {
    let router = create_test_router(Setup::default());
    let (rid, redirect) = login_as_jane(&router).await;
    let credentials = query_param(&redirect.location(), "aselect_credentials").unwrap();
    let signature = sign_as_app(&SignedFields::kill_tgt(BROKER, &credentials));

    let reply = api(
        &router,
        &[
            ("request", "kill_tgt"),
            ("a-select-server", BROKER),
            ("aselect_credentials", credentials.as_str()),
            ("signature", signature.as_str()),
        ],
    )
    .await;
    assert_eq!(reply["result_code"], "0000");

    let verify = verify_credentials(&router, &rid, &credentials).await;
    assert_eq!(verify["result_code"], "0006");
}

#[tokio::test]
async fn test_kill_session_abandons_attempt() {
    let router = create_test_router(Setup::default());
    let rid = authenticate(&router).await;
    let signature = sign_as_app(&SignedFields::kill_session(BROKER, &rid));

    let reply = api(
        &router,
        &[
            ("request", "kill_session"),
            ("a-select-server", BROKER),
            ("rid", rid.as_str()),
            ("signature", signature.as_str()),
        ],
    )
    .await;
    assert_eq!(reply["result_code"], "0000");

    let page = get(&router, &format!("/login?rid={rid}"), None).await;
    assert!(page.body.contains("0102"));
}

#[tokio::test]
async fn test_malformed_form_still_answers_with_result_code() {
    let router = create_test_router(Setup::default());
    let request = Request::builder()
        .method("POST")
        .uri("/api")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .unwrap();

    let response = send(&router, request).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.form()["result_code"], "0030");
}

#[tokio::test]
async fn test_health_reports_counts() {
    let router = create_test_router(Setup::default());
    authenticate(&router).await;

    let response = get(&router, "/health", None).await;

    assert_eq!(response.status, StatusCode::OK);
    let health: serde_json::Value = serde_json::from_str(&response.body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["server_id"], BROKER);
    assert_eq!(health["sessions"], 1);
    assert_eq!(health["tickets"], 0);
}
