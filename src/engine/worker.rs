//! Worker loop: the periodic tick that drives rescue and claiming.
//!
//! One tick runs the rescue sweeper, then claims queued jobs while worker
//! capacity remains, handing each claimed job to a pipeline executor on its
//! own task. The claim itself is the store's `FOR UPDATE SKIP LOCKED`
//! transition, so multiple processes can run workers against one queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use super::executor::{Executor, ExecutorDeps};
use super::rescue::RescueSweeper;
use crate::store::StoreError;

/// Tick interval for the sweep-and-claim loop.
const TICK_INTERVAL: Duration = Duration::from_secs(2);

/// Drives rescue sweeps and job claiming for one process.
pub struct Worker {
    deps: ExecutorDeps,
    sweeper: RescueSweeper,
    in_flight: Arc<AtomicUsize>,
}

impl Worker {
    /// Create a worker over the shared dependencies.
    pub fn new(deps: ExecutorDeps) -> Self {
        let sweeper = RescueSweeper::new(
            Arc::clone(&deps.store),
            deps.config.clone(),
            Arc::clone(&deps.metrics),
        );
        Self {
            deps,
            sweeper,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Jobs currently executing on this worker.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// One scheduler tick: sweep stalled jobs, then claim while capacity
    /// permits. Returns the number of jobs claimed this tick.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when claiming fails; sweep failures are logged
    /// and do not block claiming.
    pub async fn tick(&self) -> Result<usize, StoreError> {
        match self.sweeper.sweep(Utc::now()).await {
            Ok(report) if report.total() > 0 => {
                info!(rescued = report.total(), "rescue sweep requeued stalled jobs");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "rescue sweep failed"),
        }

        let mut claimed = 0usize;
        while self.in_flight.load(Ordering::SeqCst) < self.deps.config.max_concurrent {
            let Some(job) = self.deps.store.claim_next_job().await? else {
                break;
            };
            info!(job_id = %job.id, "job claimed");
            claimed = claimed.saturating_add(1);

            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let deps = self.deps.clone();
            let in_flight = Arc::clone(&self.in_flight);
            let job_id = job.id;
            tokio::spawn(async move {
                Executor::new(deps).run(job_id).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            });
        }
        Ok(claimed)
    }

    /// Run the tick loop until shutdown. Claiming stops on ctrl-c; in-flight
    /// jobs keep running and anything interrupted is eventually rescued.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        info!(
            max_concurrent = self.deps.config.max_concurrent,
            "worker loop started"
        );
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "worker tick failed");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!(
                        in_flight = self.in_flight(),
                        "shutdown signal received, no further claims"
                    );
                    break;
                }
            }
        }
    }
}
