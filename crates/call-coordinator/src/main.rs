//! Call Coordinator
//!
//! Stateful in-memory signaling server for a browser chat/voice
//! application. No durable store: every table self-heals on disconnect.
//!
//! # Servers
//!
//! - WebSocket server for client signaling (default: 0.0.0.0:4480)
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Spawn the coordinator actor
//! 4. Start the health HTTP server (liveness, readiness, metrics)
//! 5. Start the WebSocket server
//! 6. Wait for shutdown signal, then drain via the cancellation tree

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use call_coordinator::actors::{CoordinatorHandle, CoordinatorMetrics};
use call_coordinator::auth::DevTokenVerifier;
use call_coordinator::config::Config;
use call_coordinator::observability::{health_router, HealthState};
use call_coordinator::server::{self, AppState};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "call_coordinator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Call Coordinator");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        node_id = %config.node_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        ring_timeout_seconds = config.ring_timeout_seconds,
        connection_queue_depth = config.connection_queue_depth,
        "Configuration loaded"
    );

    // Metrics recorder must be installed before any metrics are recorded.
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus metrics recorder")?;

    let health_state = Arc::new(HealthState::new());
    let metrics = CoordinatorMetrics::new();

    let coordinator = CoordinatorHandle::new(
        config.node_id.clone(),
        Duration::from_secs(config.ring_timeout_seconds),
        Arc::clone(&metrics),
    );
    info!("Coordinator actor started");

    let shutdown_token = coordinator.child_token();

    // Health server: liveness/readiness probes plus the Prometheus
    // /metrics endpoint. Bind before spawning to fail fast.
    let health_addr: SocketAddr = config
        .health_bind_address
        .parse()
        .with_context(|| format!("Invalid health bind address {}", config.health_bind_address))?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .with_context(|| format!("Failed to bind health server to {health_addr}"))?;

    let health_shutdown = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(
            async move {
                health_shutdown.cancelled().await;
                info!("Health server shutting down");
            },
        );
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Signaling WebSocket server.
    let ws_addr: SocketAddr = config
        .bind_address
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_address))?;

    let app_state = AppState {
        coordinator: coordinator.clone(),
        verifier: Arc::new(DevTokenVerifier),
        queue_depth: config.connection_queue_depth,
    };
    let ws_app = server::router(app_state);

    let ws_listener = tokio::net::TcpListener::bind(ws_addr)
        .await
        .with_context(|| format!("Failed to bind signaling server to {ws_addr}"))?;

    let ws_shutdown = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %ws_addr, "Signaling server starting");
        let server = axum::serve(ws_listener, ws_app).with_graceful_shutdown(async move {
            ws_shutdown.cancelled().await;
            info!("Signaling server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Signaling server failed");
        }
    });

    health_state.set_ready();
    info!("Call Coordinator running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");
    health_state.set_not_ready();
    shutdown_token.cancel();

    // Give the transport tasks a moment to close sockets.
    tokio::time::sleep(Duration::from_secs(1)).await;

    if let Err(e) = coordinator.shutdown().await {
        warn!(error = %e, "Coordinator shutdown error");
    }

    info!("Call Coordinator shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed; without them the service
/// cannot shut down gracefully.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
