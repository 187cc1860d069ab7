//! Signal handling for the daemon.
//!
//! On SIGTERM or SIGINT the coordinator broadcasts to its subscribers and
//! drains the backup service, which waits for the running job (up to the
//! configured timeout) before terminating it.

use crate::service::BackupService;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { shutdown_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Wait for SIGTERM or SIGINT, then notify subscribers.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!(error = %e, "Cannot listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Cannot listen for SIGTERM");
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

        self.trigger();
    }

    /// Notify subscribers without waiting for a signal.
    pub fn trigger(&self) {
        if self.shutdown_tx.send(()).is_err() {
            warn!("No subscribers for shutdown notification");
        }
    }

    /// Stop the service, giving its running job a chance to finish.
    pub async fn drain(&self, service: &BackupService) {
        info!(
            timeout_secs = service.config().shutdown_timeout.as_secs(),
            "Draining backup service"
        );
        service.shutdown().await;
        info!("Graceful shutdown complete");
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
