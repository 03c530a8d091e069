//! Cooperative control checks.
//!
//! The control plane mutates job status from outside; the executor observes
//! those transitions by re-reading the job row at every phase boundary,
//! between steps, and between section drafts. A halt is a typed signal, not
//! an error: the row already carries the intended status, so the executor
//! returns without writing anything.

use crate::types::{Job, JobStatus};

/// The halt kinds a control check can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// The job was paused; it resumes when the control plane requeues it.
    Paused,
    /// The job was cancelled; terminal from the executor's perspective.
    Cancelled,
    /// The job needs metadata resupplied before it may continue.
    ClarificationRequired,
}

impl ControlSignal {
    /// Metric/log label for this halt kind.
    pub fn label(self) -> &'static str {
        match self {
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
            Self::ClarificationRequired => "clarification_required",
        }
    }
}

/// Inspect a freshly loaded job for a control-plane halt.
///
/// Any status other than the three halt states lets execution continue:
/// `running` is the normal case, and a job the sweeper already requeued is
/// left to the at-least-once semantics of the durable writes.
pub fn check(job: &Job) -> Result<(), ControlSignal> {
    match job.status {
        JobStatus::Paused => Err(ControlSignal::Paused),
        JobStatus::Cancelled => Err(ControlSignal::Cancelled),
        JobStatus::ClarificationRequired => Err(ControlSignal::ClarificationRequired),
        _ => Ok(()),
    }
}
