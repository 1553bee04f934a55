use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::coordinator::IngestionCoordinator;

/// Handle to a running background scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
    passes: Arc<AtomicU64>,
}

impl SchedulerHandle {
    /// Signals shutdown and waits for the loop to exit.
    ///
    /// A pass already in progress is allowed to finish first.
    pub async fn stop(self) -> Result<(), tokio::task::JoinError> {
        let _ = self.shutdown_tx.send(true);
        self.join.await
    }

    /// Number of passes that have run to completion (successfully or not).
    pub fn passes_completed(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Spawns the periodic ingestion loop: run a pass, sleep `interval`, repeat.
///
/// Passes never overlap: the next sleep starts only after the previous pass
/// has returned. A pass that fails is logged and retried on the next tick.
pub fn spawn_scheduler(coordinator: IngestionCoordinator, interval: Duration) -> SchedulerHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let passes = Arc::new(AtomicU64::new(0));
    let counter = passes.clone();

    let join = tokio::spawn(async move {
        tracing::info!(interval_secs = interval.as_secs(), "Scheduler started");
        loop {
            match coordinator.run_pass().await {
                Ok(summary) => tracing::debug!(
                    new_articles = summary.new_articles,
                    feeds_failed = summary.feeds_failed,
                    "Scheduled pass finished"
                ),
                Err(e) => tracing::error!(error = %e, "Scheduled pass aborted"),
            }
            counter.fetch_add(1, Ordering::SeqCst);

            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown_rx.changed() => {
                    // A dropped sender also means shutdown
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Scheduler stopped");
    });

    SchedulerHandle {
        shutdown_tx,
        join,
        passes,
    }
}
