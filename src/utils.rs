use tokio::signal;
use tracing::{error, warn};

/// Signal that ended the serve loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

async fn interrupt() {
    if let Err(e) = signal::ctrl_c().await {
        // Keep serving: SIGTERM can still stop the process
        error!("Failed to install Ctrl+C handler: {e}");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            error!("Failed to install SIGTERM handler: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

/// Wait for Ctrl+C or SIGTERM.
///
/// Passed to `axum::serve(..).with_graceful_shutdown` so in-flight requests
/// (including pending session refreshes) finish before the listener closes.
pub async fn shutdown_signal() -> ShutdownSignal {
    let received = tokio::select! {
        _ = interrupt() => ShutdownSignal::Interrupt,
        _ = terminate() => ShutdownSignal::Terminate,
    };

    warn!(signal = ?received, "Shutdown signal received, draining connections");
    received
}
