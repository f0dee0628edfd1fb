// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// RelayPrint — CUPS print relay with supervised public tunnels
//
// Entry point. Initialises logging and backend services, resumes the
// persisted tunnel, and serves the REST API until Ctrl-C.

mod api;
mod services;

use std::net::SocketAddr;

use relayprint_core::error::Result;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use services::app_services::AppServices;
use services::data_dir;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "RelayPrint starting");

    if let Err(e) = run().await {
        error!(error = %e, "RelayPrint stopped");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let dir = data_dir::data_dir()?;
    let services = AppServices::init(&dir)?;

    // Durable state decides whether a tunnel should be up.
    services.restore_tunnel().await;
    let cleanup = services.spawn_job_cleanup();

    let config = services.config();
    let addr = format!("{}:{}", config.bind_address, config.api_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "REST API listening");

    let app = api::router(services.clone()).into_make_service_with_connect_info::<SocketAddr>();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    cleanup.abort();
    services.tunnel().shutdown().await;
    info!("RelayPrint stopped");
    Ok(served?)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
