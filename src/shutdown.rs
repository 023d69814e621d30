//! Graceful shutdown coordination for the HTTP transport.
//!
//! Listens for SIGINT/SIGTERM, flips a cancellation token that the axum
//! server's `with_graceful_shutdown` waits on, and bounds the drain phase
//! with a total timeout so a wedged connection cannot hold the process open.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Upper bound on the whole drain phase.
    pub total_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        ShutdownConfig {
            total_timeout: Duration::from_secs(30),
        }
    }
}

pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new(config: ShutdownConfig) -> Self {
        ShutdownCoordinator {
            config,
            token: CancellationToken::new(),
        }
    }

    /// Token for tasks that should stop when shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Trigger shutdown programmatically (tests, admin paths).
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Resolve when a termination signal arrives (or the token is
    /// cancelled), then log the transition.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(?error, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(error) => {
                    warn!(?error, "failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("received ctrl-c, shutting down"),
            _ = terminate => info!("received SIGTERM, shutting down"),
            _ = self.token.cancelled() => info!("shutdown triggered"),
        }
        self.token.cancel();
    }

    /// Wait for a draining future, giving up after the configured timeout.
    pub async fn drain<F>(&self, draining: F)
    where
        F: std::future::Future<Output = ()>,
    {
        if tokio::time::timeout(self.config.total_timeout, draining)
            .await
            .is_err()
        {
            warn!(
                timeout_secs = self.config.total_timeout.as_secs(),
                "shutdown drain timed out, forcing exit"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_resolves_wait() {
        let coordinator = ShutdownCoordinator::new(ShutdownConfig::default());
        coordinator.trigger();
        // Must return promptly once the token is cancelled.
        tokio::time::timeout(Duration::from_secs(1), coordinator.wait_for_signal())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn drain_times_out() {
        let coordinator = ShutdownCoordinator::new(ShutdownConfig {
            total_timeout: Duration::from_millis(10),
        });
        coordinator
            .drain(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
            .await;
    }
}
