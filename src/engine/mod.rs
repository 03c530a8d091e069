//! The job execution engine: claimer, rescue sweeper, and the pipeline
//! executor with its planner, summarizer, synthesizer, and finalizer.
//!
//! All engine state lives on durable rows; the executor holds nothing of
//! consequence in memory across phase boundaries, which is what makes
//! rescue-and-resume safe.

use thiserror::Error;

use crate::store::StoreError;

pub mod citations;
pub mod context;
pub mod control;
pub mod executor;
pub mod planner;
pub mod report;
pub mod rescue;
pub mod summarizer;
pub mod synthesizer;
pub mod worker;

pub use control::ControlSignal;

/// Errors that unwind the pipeline executor's outer frame.
///
/// Tool and parse failures never appear here; they degrade in place. Only a
/// cooperative halt or a durable-store failure stops a claimed job.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// A control check observed a halt status set by the control plane.
    /// The job row already carries the intended status; return silently.
    #[error("halted by control signal: {0:?}")]
    Halted(ControlSignal),

    /// Durable-store failure. Fatal: the job is marked `error`.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Artifact-store failure during publication. Fatal like a store error:
    /// a completed job must have published assets.
    #[error("artifact store error: {0}")]
    Artifact(#[from] crate::tools::ToolError),
}

/// Engine tuning knobs, resolved from the configuration file.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker slots: maximum concurrently executing jobs.
    pub max_concurrent: usize,
    /// Planner cap on steps per plan.
    pub max_steps: u32,
    /// Default per-job budget in seconds when the job options omit one.
    pub max_job_seconds: u64,
    /// Maximum tokens requested from the language model per call.
    pub max_llm_tokens: u32,
    /// The language model's context window in tokens.
    pub max_context: u32,
    /// Cap on notes packed into one synthesis call.
    pub max_notes_for_synth: usize,
    /// Cap on warm archive notes fed to the planner.
    pub warm_notes_limit: u32,
    /// Minimum importance for warm notes.
    pub warm_importance_min: u8,
    /// Rescue threshold for jobs that never produced steps, in seconds.
    pub rescue_start_seconds: u64,
    /// Rescue threshold on a stale heartbeat, in seconds.
    pub rescue_heartbeat_seconds: u64,
    /// Grace added on top of a job's duration budget before rescue, in seconds.
    pub rescue_grace_seconds: u64,
    /// Whether synthesis runs the longform section-draft path.
    pub longform_enabled: bool,
    /// Maximum planner expansion rounds after the original plan.
    pub max_iterations: u32,
    /// Approximate token budget across planner expansion rounds.
    pub iteration_token_budget: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            max_steps: 5,
            max_job_seconds: 1800,
            max_llm_tokens: 2048,
            max_context: 16384,
            max_notes_for_synth: 40,
            warm_notes_limit: 5,
            warm_importance_min: 3,
            rescue_start_seconds: 120,
            rescue_heartbeat_seconds: 300,
            rescue_grace_seconds: 60,
            longform_enabled: false,
            max_iterations: 1,
            iteration_token_budget: 8192,
        }
    }
}

impl EngineConfig {
    /// Token budget available for packed notes in one synthesis call:
    /// the context window minus a fixed prompt reserve and the response.
    pub fn synthesis_note_budget(&self) -> u32 {
        self.max_context
            .saturating_sub(2000)
            .saturating_sub(self.max_llm_tokens)
    }
}
