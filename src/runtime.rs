//! Shutdown coordination between the HTTP server and the indexer task
// Runtime module - one stop flag shared by every long-running task
use std::future::Future;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Stop flag cloned into every task that must react to shutdown
#[derive(Clone)]
pub struct IndexerRuntime {
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl IndexerRuntime {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Receiver to hand to background tasks; flips to `true` once on shutdown
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Resolves on Ctrl+C, SIGTERM or a programmatic shutdown, then raises the stop flag
    /// Use this with axum's `with_graceful_shutdown()`
    pub fn create_shutdown_future(&self) -> impl Future<Output = ()> + Send + 'static {
        let shutdown_tx = self.shutdown_tx.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();

        async move {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    log::info!("Shutdown signal (Ctrl+C) received...");
                }
                _ = terminate_signal() => {
                    log::info!("Shutdown signal (SIGTERM) received...");
                }
                _ = shutdown_rx.wait_for(|stop| *stop) => {
                    log::info!("Shutdown triggered programmatically...");
                }
            }
            // Signals only reach this future; background tasks watch the flag
            shutdown_tx.send_replace(true);
        }
    }

    /// Raise the stop flag and wait for background tasks
    ///
    /// Each task is awaited, never aborted, so that an in-flight commit can
    /// finish before the store is closed.
    pub async fn wait_for_shutdown_cleanup<T: 'static>(
        &self,
        service_name: &str,
        background_tasks: &mut JoinSet<T>,
    ) {
        self.trigger_shutdown();

        if !background_tasks.is_empty() {
            log::info!("Waiting for background tasks to finish...");
        }

        while let Some(result) = background_tasks.join_next().await {
            if let Err(e) = result
                && !e.is_cancelled()
            {
                log::error!("Background task error: {}", e);
            }
        }

        log::info!("{} stopped", service_name);
    }
}

impl Default for IndexerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn terminate_signal() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            log::warn!("Could not install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await
}
