//! Shutdown coordination for the engine's background loops

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Shutdown signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Graceful,
}

/// Shutdown state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    ShuttingDown,
    Shutdown,
}

/// Broadcasts shutdown to every [`ShutdownHandler`] and waits for their tasks
pub struct ShutdownCoordinator {
    state: Arc<RwLock<ShutdownState>>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a coordinator that waits at most `timeout` for tasks to exit
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            state: Arc::new(RwLock::new(ShutdownState::Running)),
            shutdown_tx,
            timeout,
        }
    }

    /// Subscribe to shutdown notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// Signal every handler, then wait for `tasks` up to the timeout
    ///
    /// Tasks still running at the deadline are aborted. Returns false if a
    /// shutdown had already been started.
    pub async fn shutdown(&self, tasks: Vec<JoinHandle<()>>) -> bool {
        {
            let mut state = self.state.write().await;
            if *state != ShutdownState::Running {
                warn!("Shutdown already in progress");
                return false;
            }
            *state = ShutdownState::ShuttingDown;
        }

        info!(tasks = tasks.len(), "Initiating graceful shutdown");

        // No receivers just means no handler is running.
        if self.shutdown_tx.send(ShutdownSignal::Graceful).is_err() {
            info!("No components listening for shutdown");
        }

        let aborts: Vec<_> = tasks.iter().map(|task| task.abort_handle()).collect();
        match tokio::time::timeout(self.timeout, join_all(tasks)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!(error = %e, "Component task failed during shutdown");
                    }
                }
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "Shutdown timed out, aborting remaining tasks");
                for abort in aborts {
                    abort.abort();
                }
            }
        }

        *self.state.write().await = ShutdownState::Shutdown;
        info!("Shutdown complete");
        true
    }

    /// Check if shutdown is in progress
    pub async fn is_shutting_down(&self) -> bool {
        let state = self.state.read().await;
        *state == ShutdownState::ShuttingDown || *state == ShutdownState::Shutdown
    }

    /// Get current state
    pub async fn state(&self) -> ShutdownState {
        *self.state.read().await
    }
}

/// Runs one long-lived component until it finishes or shutdown is signalled
pub struct ShutdownHandler {
    component_name: String,
    shutdown_rx: broadcast::Receiver<ShutdownSignal>,
}

impl ShutdownHandler {
    /// Subscribes immediately, so a shutdown sent before [`run`](Self::run)
    /// is polled is still seen
    pub fn new(coordinator: &ShutdownCoordinator, component_name: impl Into<String>) -> Self {
        Self {
            component_name: component_name.into(),
            shutdown_rx: coordinator.subscribe(),
        }
    }

    /// Run a component with graceful shutdown support
    pub async fn run<F, Fut>(mut self, f: F)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        info!(component = %self.component_name, "Starting component");

        tokio::select! {
            _ = f() => {
                info!(component = %self.component_name, "Component completed normally");
            }
            signal = self.shutdown_rx.recv() => {
                match signal {
                    Ok(ShutdownSignal::Graceful) => {
                        info!(component = %self.component_name, "Component received graceful shutdown signal");
                    }
                    Err(e) => {
                        error!(component = %self.component_name, error = %e, "Shutdown channel error");
                    }
                }
            }
        }

        info!(component = %self.component_name, "Component shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_coordinator() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(100));

        assert_eq!(coordinator.state().await, ShutdownState::Running);

        assert!(coordinator.shutdown(Vec::new()).await);
        assert_eq!(coordinator.state().await, ShutdownState::Shutdown);
        assert!(!coordinator.shutdown(Vec::new()).await);
    }

    #[tokio::test]
    async fn test_shutdown_handler_stops_component() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let handler = ShutdownHandler::new(&coordinator, "test_component");

        let task = tokio::spawn(async move {
            handler
                .run(|| async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                })
                .await;
        });

        let started = std::time::Instant::now();
        coordinator.shutdown(vec![task]).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_task_is_aborted_at_deadline() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(100));
        let stuck = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let started = tokio::time::Instant::now();

        coordinator.shutdown(vec![stuck]).await;

        assert_eq!(coordinator.state().await, ShutdownState::Shutdown);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
