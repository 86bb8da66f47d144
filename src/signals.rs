//! OS signal handling for graceful shutdown

use tokio::sync::watch;
use tracing::{error, info};

use crate::error::ServerError;

/// Spawn a task that flips the shutdown flag on the first termination signal.
pub fn spawn_signal_handler(shutdown: watch::Sender<bool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = wait_for_signal().await {
            error!("{}", e);
            return;
        }

        info!("Shutdown signal received");
        let _ = shutdown.send(true);
    })
}

/// Wait for a termination signal
pub async fn wait_for_signal() -> Result<(), ServerError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| ServerError::Signal(format!("failed to create SIGINT handler: {}", e)))?;
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| ServerError::Signal(format!("failed to create SIGTERM handler: {}", e)))?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }

        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| ServerError::Signal(format!("failed to listen for Ctrl+C: {}", e)))?;
        info!("Received Ctrl+C");
        Ok(())
    }
}
