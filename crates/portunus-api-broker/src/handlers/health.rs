//! Liveness endpoint

use axum::{extract::State, Json};

use crate::models::HealthResponse;
use crate::state::BrokerState;

/// `GET /health`
pub async fn health(State(state): State<BrokerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        server_id: state.config.server_id.to_string(),
        sessions: state.sessions.count().await,
        tickets: state.tickets.count().await,
    })
}
