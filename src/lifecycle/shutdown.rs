//! Shutdown coordination for the engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
#[derive(Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        let _ = self.tx.send(());
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Get the number of active subscribers (tasks still running).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Spawn a task that runs `tick` every `interval` until shutdown.
    ///
    /// Used for session eviction and background-port expiry.
    pub fn spawn_periodic<F>(&self, name: &'static str, interval: Duration, mut tick: F) -> JoinHandle<()>
    where
        F: FnMut() + Send + 'static,
    {
        let mut shutdown = self.subscribe();
        tokio::spawn(async move {
            tracing::debug!(task = name, interval = ?interval, "Periodic task starting");
            let mut ticker = time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => tick(),
                    _ = shutdown.recv() => {
                        tracing::debug!(task = name, "Periodic task received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
