//! Broker route definitions

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::handlers::{
    api, choose_authsp, choose_organization, cross_login, cross_return, health, login, logout,
    submit_credentials,
};
use crate::state::BrokerState;

/// Create the broker router with every browser and back-channel endpoint.
pub fn broker_router(state: BrokerState) -> Router {
    Router::new()
        // Browser entry and forms
        .route("/login", get(login))
        .route("/login/authsp", post(choose_authsp))
        .route("/login/organization", post(choose_organization))
        .route("/login/credentials", post(submit_credentials))
        // Cross-domain delegation
        .route("/cross/login", get(cross_login))
        .route("/cross/return", get(cross_return))
        .route("/logout", get(logout))
        // Back-channel
        .route("/api", post(api))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
