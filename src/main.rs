// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use deploy_relay::api::router;
use deploy_relay::config::RelayConfig;
use deploy_relay::state::AppState;

#[tokio::main]
async fn main() {
    init_tracing();

    // Total absence of required configuration is the one process-fatal
    // error; everything after this point is per-request.
    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Configuration error");
            std::process::exit(1);
        }
    };

    // Validate every exposed service up front so misconfiguration surfaces
    // at startup instead of on first webhook delivery.
    for name in config.services.names() {
        if let Err(e) = config.services.validate(name) {
            error!(error = %e, "Service configuration error");
            std::process::exit(1);
        }
    }
    info!(services = config.services.len(), "Service configuration validated");

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, host = %config.host, port = config.port, "Invalid bind address");
            std::process::exit(1);
        }
    };

    let state = AppState::new(config);

    let shutdown = CancellationToken::new();
    tokio::spawn(Arc::clone(&state.limiter).run_sweeper(shutdown.clone()));

    let app = router(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, %addr, "Failed to bind");
            std::process::exit(1);
        }
    };

    info!(%addr, "Deploy relay listening (docs at /docs)");

    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()));

    if let Err(e) = serve.await {
        error!(error = %e, "HTTP server failed");
    }

    // Stop the rate limiter sweeper along with the server.
    shutdown.cancel();
}

async fn shutdown_signal(token: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
    token.cancel();
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
