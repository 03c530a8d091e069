//! Rescue sweeper: returns stalled running jobs to the queue.
//!
//! Two stall shapes exist. A job that never produced steps is judged on its
//! start time; a job mid-pipeline is judged on its freshest liveness
//! timestamp against the heartbeat threshold, tightened by the job's own
//! duration budget. Rescued jobs get their running steps reset to pending so
//! the next executor resumes cleanly.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use super::EngineConfig;
use crate::metrics::Metrics;
use crate::store::{Store, StoreError};
use crate::types::Job;

/// Why a job was rescued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescueReason {
    /// The job never produced steps within the start threshold.
    Start,
    /// The job's heartbeat went stale.
    Heartbeat,
}

/// Jobs rescued in one sweep, by reason.
#[derive(Debug, Default)]
pub struct RescueReport {
    /// Jobs rescued with reason `start`.
    pub start: Vec<Uuid>,
    /// Jobs rescued with reason `heartbeat`.
    pub heartbeat: Vec<Uuid>,
}

impl RescueReport {
    /// Total jobs rescued.
    pub fn total(&self) -> usize {
        self.start.len().saturating_add(self.heartbeat.len())
    }
}

/// A clamped seconds-to-duration conversion that cannot panic on
/// pathological configuration values.
fn seconds(value: u64) -> Duration {
    i64::try_from(value)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

/// Periodic scanner for stalled running jobs.
pub struct RescueSweeper {
    store: Arc<dyn Store>,
    config: EngineConfig,
    metrics: Arc<Metrics>,
}

impl RescueSweeper {
    /// Create a sweeper over the shared store.
    pub fn new(store: Arc<dyn Store>, config: EngineConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            config,
            metrics,
        }
    }

    /// Decide whether a job is stalled at `now`.
    ///
    /// `has_steps` distinguishes a dead claim (no steps yet) from a dead
    /// pipeline (stale heartbeat).
    pub fn classify(&self, job: &Job, has_steps: bool, now: DateTime<Utc>) -> Option<RescueReason> {
        if !has_steps {
            let anchor = match job.started_at {
                Some(started) => started.max(job.created_at),
                None => job.created_at,
            };
            if now.signed_duration_since(anchor) > seconds(self.config.rescue_start_seconds) {
                return Some(RescueReason::Start);
            }
            return None;
        }

        let mut base = job.updated_at;
        if let Some(heartbeat) = job.last_heartbeat {
            base = base.max(heartbeat);
        }
        if let Some(started) = job.started_at {
            base = base.max(started);
        }

        let budget_seconds = job
            .options
            .max_duration_seconds
            .unwrap_or(self.config.max_job_seconds)
            .saturating_add(self.config.rescue_grace_seconds);
        let threshold = seconds(self.config.rescue_heartbeat_seconds).min(seconds(budget_seconds));

        if now.signed_duration_since(base) > threshold {
            return Some(RescueReason::Heartbeat);
        }
        None
    }

    /// Scan running jobs and requeue the stalled ones.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the scan itself fails; per-job rescue
    /// failures are logged and skipped so one bad row cannot wedge the sweep.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<RescueReport, StoreError> {
        let running = self.store.list_running_jobs().await?;
        let mut report = RescueReport::default();

        for job in &running {
            let has_steps = !self.store.list_steps(job.id).await?.is_empty();
            let Some(reason) = self.classify(job, has_steps, now) else {
                continue;
            };

            if let Err(e) = self.store.requeue_job(job.id).await {
                warn!(job_id = %job.id, error = %e, "rescue requeue failed");
                continue;
            }
            info!(job_id = %job.id, reason = ?reason, "job rescued back to queue");
            match reason {
                RescueReason::Start => {
                    self.metrics.rescues.record_start();
                    report.start.push(job.id);
                }
                RescueReason::Heartbeat => {
                    self.metrics.rescues.record_heartbeat();
                    report.heartbeat.push(job.id);
                }
            }
        }

        let rescued: Vec<Uuid> = report
            .start
            .iter()
            .chain(report.heartbeat.iter())
            .copied()
            .collect();
        if !rescued.is_empty() {
            let reset = self.store.reset_running_steps(&rescued).await?;
            info!(jobs = rescued.len(), steps_reset = reset, "rescued steps reset to pending");
        }

        Ok(report)
    }
}
