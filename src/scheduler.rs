//! Periodic reconciliation worker.
//!
//! One background task per process runs a reconciliation pass on every tick.
//! A pass is awaited before the next tick is taken, so passes never overlap
//! inside the process; ticks missed while a slow pass runs are skipped rather
//! than replayed in a burst.

use crate::inventory::SimInventory;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, warn};

/// Handle on a running reconciler. Dropping it leaves the task running.
#[derive(Debug)]
pub struct ReconcilerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Signals the worker to stop and waits for the current pass to finish.
    pub async fn shutdown(self) {
        // the receiver only goes away once the task has ended
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Reconciler task ended abnormally");
        }
    }
}

/// Starts the reconciliation worker. The first pass runs immediately.
#[must_use]
pub fn spawn_reconciler(inventory: SimInventory, period: Duration) -> ReconcilerHandle {
    let (shutdown, mut stop) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = period.as_secs(), "Reconciler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.changed() => break,
            }

            match inventory.reconcile().await {
                Ok(report) if !report.failures().is_empty() => warn!(
                    failed = report.failures().len(),
                    released = report.total_released(),
                    "Reconciliation pass finished with failed pools"
                ),
                Ok(_) => {}
                Err(e) => error!(error = %e, "Reconciliation pass failed"),
            }

            if *stop.borrow() {
                break;
            }
        }

        info!("Reconciler stopped");
    });

    ReconcilerHandle { shutdown, task }
}
