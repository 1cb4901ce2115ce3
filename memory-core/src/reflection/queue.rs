//! Per-session FIFO reflection queue.
//!
//! Triggers are fire-and-forget from the caller's perspective, but a single
//! worker task serializes execution so reflections run in episode-close
//! order. `flush` waits for the queue to drain; `shutdown` drains and joins
//! the worker.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use super::ReflectionRunner;

pub(crate) struct ReflectionQueue {
    tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<Uuid>>>,
    pending_tx: watch::Sender<usize>,
    pending_rx: watch::Receiver<usize>,
    worker: AsyncMutex<Option<JoinHandle<()>>>,
}

impl ReflectionQueue {
    /// Spawn the worker task for a session.
    pub fn spawn(runner: Arc<ReflectionRunner>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Uuid>();
        let (pending_tx, pending_rx) = watch::channel(0usize);
        let pending_for_worker = pending_tx.clone();
        let worker = tokio::spawn(async move {
            while let Some(episode_id) = rx.recv().await {
                if let Err(e) = runner.run(episode_id).await {
                    warn!(%episode_id, error = %e, "reflection run failed");
                }
                pending_for_worker.send_modify(|n| *n = n.saturating_sub(1));
            }
        });
        Self {
            tx: parking_lot::Mutex::new(Some(tx)),
            pending_tx,
            pending_rx,
            worker: AsyncMutex::new(Some(worker)),
        }
    }

    /// Queue a closed episode for reflection.
    pub fn enqueue(&self, episode_id: Uuid) {
        let guard = self.tx.lock();
        match guard.as_ref() {
            Some(tx) => {
                self.pending_tx.send_modify(|n| *n += 1);
                if tx.send(episode_id).is_err() {
                    self.pending_tx.send_modify(|n| *n = n.saturating_sub(1));
                    warn!(%episode_id, "reflection worker is gone; trigger dropped");
                }
            }
            None => warn!(%episode_id, "reflection queue already shut down; trigger dropped"),
        }
    }

    /// Wait until every queued reflection has completed.
    pub async fn flush(&self) {
        let mut rx = self.pending_rx.clone();
        // wait_for only errors when the sender is dropped, which means the
        // queue is gone and nothing is pending.
        let _ = rx.wait_for(|pending| *pending == 0).await;
    }

    /// Drain the queue and join the worker. Idempotent.
    pub async fn shutdown(&self) {
        {
            self.tx.lock().take();
        }
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "reflection worker panicked");
            }
        }
    }
}
