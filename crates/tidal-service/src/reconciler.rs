//! Background reconciler.
//!
//! Wakes on every segment-store write or on a fixed tick and, per
//! collection, persists automatically sealed segments, starts index builds
//! for newly flushed segments and incorporates them into loaded replicas.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tidal_core::{CollectionId, CoreResult};
use tidal_storage::SegmentStateStore;

use crate::flush::FlushCoordinator;
use crate::index_build::IndexCoordinator;
use crate::load::LoadCoordinator;
use crate::metrics::RECONCILE_RUNS_TOTAL;

/// Collaborators driven by each reconcile pass.
#[derive(Clone)]
pub struct ReconcileTargets {
    pub segments: Arc<SegmentStateStore>,
    pub flush: Arc<FlushCoordinator>,
    pub index: Arc<IndexCoordinator>,
    pub load: Arc<LoadCoordinator>,
}

impl ReconcileTargets {
    /// Runs one pass over every collection known to the segment store.
    ///
    /// A failing collection does not stop the others; the first error is
    /// returned after all collections were visited.
    pub async fn run_once(&self) -> CoreResult<()> {
        let mut first_error = None;
        for collection_id in self.segments.collections() {
            if let Err(e) = self.reconcile_collection(collection_id).await {
                warn!(collection_id = %collection_id, error = %e, "reconcile pass failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn reconcile_collection(&self, collection_id: CollectionId) -> CoreResult<()> {
        self.flush.start_persist(collection_id, false)?;
        self.index.run_pass(collection_id).await?;
        self.load.incorporate(collection_id).await
    }
}

/// Handle to the running reconcile loop.
pub struct Reconciler {
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Reconciler {
    /// Spawns the loop on the current tokio runtime.
    pub fn start(targets: ReconcileTargets, tick: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let changed = targets.segments.change_notifier();
        let worker = tokio::spawn(run_loop(targets, changed, tick, shutdown_rx));
        info!(tick_ms = tick.as_millis() as u64, "reconciler started");
        Self {
            shutdown_tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Stops the loop and waits for the in-progress pass to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                warn!(error = %e, "reconciler task ended abnormally");
            }
            info!("reconciler stopped");
        }
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
    }
}

async fn run_loop(
    targets: ReconcileTargets,
    changed: Arc<Notify>,
    tick: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = changed.notified() => {}
            _ = tokio::time::sleep(tick) => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        let started = Instant::now();
        match targets.run_once().await {
            Ok(()) => {
                RECONCILE_RUNS_TOTAL.with_label_values(&["ok"]).inc();
                debug!(elapsed_ms = started.elapsed().as_millis() as u64, "reconcile pass complete");
            }
            Err(_) => RECONCILE_RUNS_TOTAL.with_label_values(&["error"]).inc(),
        }
    }
}
