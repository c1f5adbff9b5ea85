use tokio::signal;

use crate::orchestrator::Orchestrator;
use crate::server::AppState;

/// Wait for a shutdown signal (SIGINT or SIGTERM).
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }
}

/// Stop dispatching and release every run still waiting for callbacks.
///
/// Released runs resolve as lost, which lets the orchestrator finish its
/// current plan and return a partial report.
pub async fn graceful_shutdown(state: &AppState, orchestrator: &Orchestrator) {
    tracing::info!("Starting graceful shutdown...");

    orchestrator.stop();

    for key in state.registry.pending_keys().await {
        tracing::info!(key = %key, "Abandoning run");
    }
    let abandoned = state.registry.close().await;

    tracing::info!(abandoned, "Graceful shutdown complete");
}
