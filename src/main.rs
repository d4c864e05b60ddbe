//! # Dynamic Gateway - Main Entry Point
//!
//! Loads the configuration, initializes logging and metrics, assembles the gateway and
//! serves two listeners until SIGINT or SIGTERM:
//!
//! - the proxy listener (`server.bind_address:server.port`)
//! - the admin listener (`admin.bind_address:admin.port`), unless `admin.enabled` is false
//!
//! Errors below this point are `GatewayError`s; `anyhow` only adds context for the
//! operator at this edge.

use anyhow::Context;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use dynamic_gateway::gateway::Gateway;
use dynamic_gateway::observability::{init_logging, install_recorder};
use dynamic_gateway::GatewayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env()
        .await
        .context("failed to load gateway configuration")?;

    init_logging(&config.logging);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting dynamic gateway");

    let mut gateway = Gateway::build(config).await.context("failed to assemble gateway")?;
    if gateway.config().metrics.enabled {
        match install_recorder() {
            Ok(handle) => gateway = gateway.with_metrics(handle),
            Err(e) => warn!(error = %e, "Metrics disabled"),
        }
    }

    let background = gateway.start().await;

    let config = gateway.config().clone();
    let proxy_addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let proxy_listener = TcpListener::bind(&proxy_addr)
        .await
        .with_context(|| format!("failed to bind proxy listener to {}", proxy_addr))?;
    info!(address = %proxy_addr, "Proxy listener started");

    let proxy = axum::serve(
        proxy_listener,
        gateway
            .proxy_router()
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    if config.admin.enabled {
        let admin_addr = format!("{}:{}", config.admin.bind_address, config.admin.port);
        let admin_listener = TcpListener::bind(&admin_addr)
            .await
            .with_context(|| format!("failed to bind admin listener to {}", admin_addr))?;
        info!(address = %admin_addr, "Admin listener started");

        let admin = axum::serve(
            admin_listener,
            gateway
                .admin_router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal());

        let (proxy_result, admin_result) = tokio::join!(proxy, admin);
        proxy_result.context("proxy listener failed")?;
        admin_result.context("admin listener failed")?;
    } else {
        proxy.await.context("proxy listener failed")?;
    }

    for task in background {
        task.abort();
    }
    info!("Dynamic gateway stopped");
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
