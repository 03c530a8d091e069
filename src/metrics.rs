//! Process-local counters for tool health, control halts, and rescues.
//!
//! Lock-free atomics in the style of the session budget tracker. Metrics
//! backends are out of scope; these counters feed logs and the status CLI.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::engine::control::ControlSignal;

/// Per-tool call, error, and cumulative latency counters.
#[derive(Debug, Default)]
pub struct ToolStat {
    calls: AtomicU64,
    errors: AtomicU64,
    total_micros: AtomicU64,
}

impl ToolStat {
    /// Record one completed call and its latency.
    pub fn observe(&self, elapsed: Duration) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.total_micros.fetch_add(
            u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }

    /// Record one failed call.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Total calls observed.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Total errors recorded.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Mean latency in microseconds, 0 when no calls were observed.
    pub fn mean_micros(&self) -> u64 {
        let calls = self.calls.load(Ordering::Relaxed);
        if calls == 0 {
            return 0;
        }
        self.total_micros
            .load(Ordering::Relaxed)
            .checked_div(calls)
            .unwrap_or(0)
    }
}

/// Counters for cooperative halts, labeled by signal kind.
#[derive(Debug, Default)]
pub struct HaltCounters {
    paused: AtomicU64,
    cancelled: AtomicU64,
    clarification: AtomicU64,
}

impl HaltCounters {
    /// Record a halt by signal kind.
    pub fn record(&self, signal: ControlSignal) {
        let counter = match signal {
            ControlSignal::Paused => &self.paused,
            ControlSignal::Cancelled => &self.cancelled,
            ControlSignal::ClarificationRequired => &self.clarification,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Halts observed for a signal kind.
    pub fn count(&self, signal: ControlSignal) -> u64 {
        match signal {
            ControlSignal::Paused => self.paused.load(Ordering::Relaxed),
            ControlSignal::Cancelled => self.cancelled.load(Ordering::Relaxed),
            ControlSignal::ClarificationRequired => self.clarification.load(Ordering::Relaxed),
        }
    }
}

/// Counters for rescues, labeled by reason.
#[derive(Debug, Default)]
pub struct RescueCounters {
    start: AtomicU64,
    heartbeat: AtomicU64,
}

impl RescueCounters {
    /// Record a rescue that fired because the job never produced steps.
    pub fn record_start(&self) {
        self.start.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rescue that fired on a stale heartbeat.
    pub fn record_heartbeat(&self) {
        self.heartbeat.fetch_add(1, Ordering::Relaxed);
    }

    /// Rescues with reason `start`.
    pub fn start(&self) -> u64 {
        self.start.load(Ordering::Relaxed)
    }

    /// Rescues with reason `heartbeat`.
    pub fn heartbeat(&self) -> u64 {
        self.heartbeat.load(Ordering::Relaxed)
    }
}

/// All process-local counters, shared across worker tasks.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Search adapter stats.
    pub search: ToolStat,
    /// Fetch adapter stats.
    pub fetch: ToolStat,
    /// Chat adapter stats.
    pub chat: ToolStat,
    /// Embedding adapter stats.
    pub embed: ToolStat,
    /// Cooperative halts by kind.
    pub halts: HaltCounters,
    /// Rescues by reason.
    pub rescues: RescueCounters,
    /// Jobs that reached `completed`.
    pub jobs_completed: AtomicU64,
    /// Jobs that reached `error`.
    pub jobs_failed: AtomicU64,
}

impl Metrics {
    /// Record a completed job.
    pub fn record_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed job.
    pub fn record_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_stat_mean() {
        let stat = ToolStat::default();
        assert_eq!(stat.mean_micros(), 0);
        stat.observe(Duration::from_micros(100));
        stat.observe(Duration::from_micros(300));
        assert_eq!(stat.calls(), 2);
        assert_eq!(stat.mean_micros(), 200);
    }

    #[test]
    fn test_halt_counters_by_kind() {
        let halts = HaltCounters::default();
        halts.record(ControlSignal::Paused);
        halts.record(ControlSignal::Paused);
        halts.record(ControlSignal::Cancelled);
        assert_eq!(halts.count(ControlSignal::Paused), 2);
        assert_eq!(halts.count(ControlSignal::Cancelled), 1);
        assert_eq!(halts.count(ControlSignal::ClarificationRequired), 0);
    }
}
