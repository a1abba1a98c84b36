//! Continuous reconciliation loop.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use kubemirror_core::ObjectKey;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::queue::WorkQueue;
use crate::types::ReconcileOutcome;

/// Something that can converge one key.
#[async_trait]
pub trait KeyReconciler: Send + Sync {
    /// Converge the remote state derived from `key`.
    async fn reconcile_key(&self, key: &ObjectKey) -> ReconcileOutcome;
}

/// Configuration for the reconciliation loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Number of concurrent workers.
    pub workers: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self { workers: 1 }
    }
}

/// Continuous reconciliation loop.
///
/// Workers pull keys from the queue and act on each outcome: converged and
/// permanently failed keys reset their failure count, retryable keys are
/// re-queued with backoff.
pub struct ReconciliationLoop {
    /// The reconciler.
    reconciler: Arc<dyn KeyReconciler>,
    /// Pending keys.
    queue: Arc<WorkQueue>,
    /// Loop configuration.
    config: LoopConfig,
    /// Stop signal receiver.
    stop_rx: watch::Receiver<bool>,
    /// Stop signal sender (for external control).
    stop_tx: watch::Sender<bool>,
}

impl ReconciliationLoop {
    /// Create a new reconciliation loop.
    pub fn new(reconciler: Arc<dyn KeyReconciler>, queue: Arc<WorkQueue>, config: LoopConfig) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            reconciler,
            queue,
            config,
            stop_rx,
            stop_tx,
        }
    }

    /// Run until stopped.
    ///
    /// In-flight reconciles are abandoned on stop; the next start re-reads
    /// everything.
    ///
    /// # Errors
    ///
    /// Fails when configured with zero workers.
    pub async fn run(&mut self) -> Result<()> {
        if self.config.workers == 0 {
            return Err(Error::invalid_config("loop needs at least one worker"));
        }
        info!(workers = self.config.workers, "Starting reconciliation loop");

        let workers = join_all((0..self.config.workers).map(|id| {
            run_worker(id, Arc::clone(&self.reconciler), Arc::clone(&self.queue))
        }));
        tokio::pin!(workers);

        loop {
            tokio::select! {
                _ = &mut workers => {
                    info!("Work queue shut down");
                    return Ok(());
                }
                changed = self.stop_rx.changed() => {
                    if changed.is_err() || *self.stop_rx.borrow() {
                        self.queue.shut_down().await;
                        info!("Reconciliation loop stopped");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Get a stopper handle.
    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }
}

async fn run_worker(id: usize, reconciler: Arc<dyn KeyReconciler>, queue: Arc<WorkQueue>) {
    while let Some(key) = queue.next().await {
        debug!(worker = id, key = %key, "Processing key");
        match reconciler.reconcile_key(&key).await {
            ReconcileOutcome::Converged | ReconcileOutcome::PermanentFailure { .. } => {
                queue.forget(&key).await;
            }
            ReconcileOutcome::Retry { .. } => {
                queue.retry(&key).await;
            }
        }
        queue.done(&key).await;
    }
}

/// Handle to stop a reconciliation loop.
#[derive(Clone)]
pub struct LoopStopper {
    stop_tx: watch::Sender<bool>,
}

impl LoopStopper {
    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}
