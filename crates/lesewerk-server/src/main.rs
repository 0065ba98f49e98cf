// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Lesewerk — OCR ingestion service
//
// Entry point. Loads configuration, initialises logging and backend services,
// serves HTTP until Ctrl-C or SIGTERM, then drains the recognition pool.

mod error;
mod routes;
mod services;
mod state;

use std::process::ExitCode;

use lesewerk_core::ServiceConfig;
use tracing_subscriber::EnvFilter;

use services::app_services::AppServices;
use state::AppState;

#[tokio::main]
async fn main() -> ExitCode {
    let config = ServiceConfig::from_env();
    let log_json = config.as_ref().map(|c| c.server.log_json).unwrap_or(false);
    init_tracing(log_json);

    let config = match config {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Lesewerk starting");

    let services = match AppServices::init(config.clone()).await {
        Ok(services) => services,
        Err(err) => {
            tracing::error!(error = %err, "Service initialisation failed");
            return ExitCode::FAILURE;
        }
    };

    let addr = (config.server.host.as_str(), config.server.port);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(
                host = %config.server.host,
                port = config.server.port,
                error = %err,
                "Could not bind"
            );
            services.shutdown().await;
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        "Lesewerk listening"
    );

    let app = routes::router(AppState::new(services.clone()));
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Requests are finished; let queued pages drain before exiting.
    services.shutdown().await;

    match served {
        Ok(()) => {
            tracing::info!("Lesewerk stopped");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "Server error");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
