//! Portunus broker server
//!
//! Loads configuration and the party registry, wires the broker state and
//! serves the browser and back-channel endpoints until SIGTERM or Ctrl+C.

mod bootstrap;
mod config;
mod logging;

use std::net::SocketAddr;
use tokio::signal;
use tracing::{error, info, warn};

use crate::config::Config;

#[tokio::main]
async fn main() {
    // Fail fast on missing or malformed configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.rust_log);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.host,
        port = config.port,
        env = %config.app_env,
        server_id = %config.server_id,
        "Starting Portunus broker"
    );

    for warning in config.security_warnings() {
        warn!(target: "security", "{warning}");
    }

    let state = match bootstrap::load(&config).and_then(|doc| bootstrap::build_state(&config, doc))
    {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize broker: {e}");
            std::process::exit(1);
        }
    };

    // Expired sessions, tickets and one-time codes
    let cleanup_state = state.clone();
    let cleanup_interval = config.cleanup_interval;
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(cleanup_interval).await;
            let (sessions, tickets) = cleanup_state.cleanup_expired().await;
            if sessions > 0 || tickets > 0 {
                info!(sessions, tickets, "Expired entries removed");
            }
        }
    });

    let app = portunus_api_broker::broker_router(state);

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid listen address {}:{}: {e}", config.host, config.port);
            std::process::exit(1);
        }
    };

    info!(%addr, "Server listening");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to address {addr}: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {e}");
        std::process::exit(1);
    }

    info!("Server stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
