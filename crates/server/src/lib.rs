//! Switchboard server library.
//!
//! Provides a reusable server function to serve Switchboard either for the
//! binary, or for integration tests.

#![deny(missing_docs)]

mod logger;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::anyhow;
use axum::{Json, Router, routing::get};
use axum_server::tls_rustls::RustlsConfig;
use config::Config;
use telemetry::TelemetryGuard;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

/// Configuration for serving Switchboard.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to
    pub listen_address: SocketAddr,
    /// The deserialized Switchboard TOML configuration.
    pub config: Config,
    /// Cancellation token for graceful shutdown
    pub shutdown_signal: CancellationToken,
    /// Log filter string (e.g., "info" or "server=debug,responses=debug")
    pub log_filter: String,
    /// The version string to log on startup
    pub version: String,
    /// Optional oneshot sender to send back the bound address (useful if port 0 was specified)
    pub bound_addr_sender: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
}

/// Starts and runs the Switchboard server with the provided configuration.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        log_filter,
        version,
        bound_addr_sender,
    }: ServeConfig,
) -> anyhow::Result<()> {
    let _telemetry_guard = init_otel(&config, log_filter).await;

    // Log the version as the first message after logger initialization
    log::info!("Switchboard {version}");

    let vector_search = vector_search::build_service(&config)
        .await
        .map_err(|e| anyhow!("Failed to initialize vector search: {e}"))?;

    let orchestrator = responses::build_orchestrator(&config, Arc::clone(&vector_search), None)
        .map_err(|e| anyhow!("Failed to initialize orchestrator: {e}"))?;

    // Background work survives individual requests and stops on shutdown.
    tokio::spawn(vector_search::sweeper::run(
        Arc::clone(&vector_search),
        config.vector_store.sweep_interval,
        shutdown_signal.child_token(),
    ));

    let mut app = Router::new()
        .merge(responses::router(orchestrator))
        .merge(vector_search::router(vector_search))
        .layer(CorsLayer::permissive());

    if config.server.health.enabled {
        let health_router = Router::new().route(&config.server.health.path, get(health));
        app = app.merge(health_router);
    }

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    if let Some(sender) = bound_addr_sender {
        sender
            .send(listener.local_addr()?)
            .map_err(|_| anyhow!("Failed to send back bound address."))?;
    }

    match &config.server.tls {
        Some(tls_config) => {
            let rustls_config = RustlsConfig::from_pem_file(&tls_config.certificate, &tls_config.key)
                .await
                .map_err(|e| anyhow!("Failed to load TLS certificate and key: {e}"))?;

            log::info!("Responses endpoint: https://{listen_address}/v1/responses");

            let server = axum_server::from_tcp_rustls(listener.into_std()?, rustls_config)
                .serve(app.into_make_service_with_connect_info::<SocketAddr>());

            // Run with graceful shutdown
            tokio::select! {
                result = server => {
                    result.map_err(|e| anyhow!("Failed to start HTTPS server: {e}"))?;
                }
                _ = shutdown_signal.cancelled() => {
                    log::info!("Received shutdown signal, shutting down gracefully...");
                    // The TelemetryGuard will be dropped when this function returns
                }
            }
        }
        None => {
            log::info!("Responses endpoint: http://{listen_address}/v1/responses");

            // Run with graceful shutdown
            tokio::select! {
                result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()) => {
                    result.map_err(|e| anyhow!("Failed to start HTTP server: {}", e))?;
                }
                _ = shutdown_signal.cancelled() => {
                    log::info!("Received shutdown signal, shutting down gracefully...");
                    // The TelemetryGuard will be dropped when this function returns
                }
            }
        }
    }

    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn init_otel(config: &Config, log_filter: String) -> Option<TelemetryGuard> {
    let Some(telemetry_config) = &config.telemetry else {
        logger::init(&log_filter);
        return None;
    };

    // Don't let telemetry code log during initialization to avoid recursion
    match telemetry::init(telemetry_config).await {
        Ok(guard) => {
            logger::init(&log_filter);
            Some(guard)
        }
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {e}");
            logger::init(&log_filter);
            None
        }
    }
}
