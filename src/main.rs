use std::net::SocketAddr;
use std::process::ExitCode;

use axum::extract::Request;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use openpolicy_router::{AppState, Backends, Config, build_app, metrics, utils};

#[tokio::main]
async fn main() -> ExitCode {
    // Config is loaded first so LOG_FORMAT can pick the log output
    let config = Config::from_env();
    match &config {
        Ok(config) => init_tracing(&config.log_level, config.log_json),
        Err(_) => init_tracing("info", false),
    }

    info!(
        "Starting OpenPolicy Router v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    }
}

/// Run the application, returning an exit code on error.
async fn run(config: Config) -> Result<(), exitcode::ExitCode> {
    info!(
        host = %config.host,
        port = %config.port,
        root_domains = ?config.root_domains,
        api_prefix = %config.api_prefix,
        "Configuration loaded"
    );

    if let Some(metrics_addr) = config.metrics_addr() {
        metrics::try_init_metrics(metrics_addr);
    }

    let backends = Backends::from_config(&config).map_err(|e| {
        error!("Failed to initialize backends: {e:#}");
        exitcode::CONFIG
    })?;
    info!(backends = ?backends.names(), "Backends initialized");

    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;

    let state = AppState::new(config, backends);
    let app = build_app(state.clone());

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("  GET  /health                - Health check");
    info!("  GET  /ready                 - Readiness check");
    info!("  GET  /{{workspace}}/{{*path}}   - Workspace pages");

    axum::serve(
        listener,
        axum::ServiceExt::<Request>::into_make_service_with_connect_info::<SocketAddr>(app),
    )
    .with_graceful_shutdown(async {
        utils::shutdown_signal().await;
    })
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}
