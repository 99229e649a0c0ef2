//! OS signal handling.

/// Resolve on the first Ctrl+C (SIGINT).
///
/// If the handler cannot be installed the error is logged and the future
/// never resolves, so the run continues until its own completion.
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Interrupt received, shutting down"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    }
}
