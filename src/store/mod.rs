//! Durable store: the authoritative state for jobs, steps, notes, sources,
//! citation ledger entries, and section drafts.
//!
//! The [`Store`] trait is the seam between the engine and persistence. Two
//! implementations exist:
//! - [`postgres::PgStore`] — production backend over `sqlx` + Postgres,
//!   relying on `FOR UPDATE SKIP LOCKED` for queue claims
//! - [`mem::MemStore`] — mutex-guarded in-memory backend for tests and
//!   dry runs, enforcing the same uniqueness constraints

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{
    CitationMapEntry, DraftStatus, IntakeOutcome, Job, JobStatus, LedgerEntry, Metadata, NewJob,
    NewLedgerEntry, NewNote, NewSource, NewStep, Note, ReportAssets, SectionDraft, SectionKey,
    Source, Step, StepStatus,
};

pub mod mem;
pub mod postgres;

/// Durable store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure. Fatal to the running job.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No job row matches the given id.
    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    /// No step row matches the given id.
    #[error("step not found: {0}")]
    StepNotFound(Uuid),

    /// A citation insert lost the race for its citation number.
    ///
    /// The ledger manager retries the read-max-insert sequence on this.
    #[error("citation number {citation_number} already taken for job {job_id}")]
    CitationConflict {
        /// The job whose ledger rejected the insert.
        job_id: Uuid,
        /// The contested citation number.
        citation_number: u32,
    },

    /// A row could not be decoded into its domain type.
    #[error("row decode error: {0}")]
    Decode(String),
}

/// The durable store seam used by every engine component.
///
/// Per-job rows are effectively single-writer once a job is claimed; the
/// cross-job races (queue claim, citation numbering) are resolved inside the
/// implementations via row locking and uniqueness constraints.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Jobs ──

    /// Create a job under the intake contract.
    ///
    /// A job missing any clarification key is created with status
    /// `clarification_required` and the returned outcome carries one prompt
    /// per missing key; otherwise the job is admitted as `queued`.
    async fn create_job(&self, new: NewJob) -> Result<IntakeOutcome, StoreError>;

    /// Load a job by id.
    async fn get_job(&self, id: Uuid) -> Result<Job, StoreError>;

    /// Atomically claim the oldest queued job, excluding rows locked by
    /// concurrent claimers. Returns `None` when the queue is empty.
    ///
    /// The claimed row transitions to `running` with `started_at`,
    /// `updated_at`, and `last_heartbeat` set to now.
    async fn claim_next_job(&self) -> Result<Option<Job>, StoreError>;

    /// Set a job's status, touching `updated_at`.
    async fn set_job_status(&self, id: Uuid, status: JobStatus) -> Result<(), StoreError>;

    /// Refresh `last_heartbeat` and `updated_at` to signal liveness.
    async fn heartbeat_job(&self, id: Uuid) -> Result<(), StoreError>;

    /// Mark a job failed with the captured error text.
    async fn set_job_error(&self, id: Uuid, error: &str) -> Result<(), StoreError>;

    /// Publish a completed job: final report, asset descriptor, status
    /// `completed`, and `completed_at`.
    async fn complete_job(
        &self,
        id: Uuid,
        final_report: &str,
        assets: &ReportAssets,
    ) -> Result<(), StoreError>;

    /// Rescue a stalled job back to the queue: status `queued`, `started_at`
    /// cleared, `last_heartbeat` refreshed.
    async fn requeue_job(&self, id: Uuid) -> Result<(), StoreError>;

    /// Control-plane resume: status `queued` with `final_report`,
    /// `report_assets`, and `completed_at` cleared for a clean re-run.
    async fn reactivate_job(&self, id: Uuid) -> Result<(), StoreError>;

    /// All jobs currently in status `running`, for the rescue sweeper.
    async fn list_running_jobs(&self) -> Result<Vec<Job>, StoreError>;

    /// Merge metadata into a job held in `clarification_required`, flipping
    /// it to `queued` once all clarification keys are present.
    async fn resupply_metadata(&self, id: Uuid, extra: &Metadata) -> Result<Job, StoreError>;

    // ── Steps ──

    /// Insert planned steps with dense 1-based ordering continuing after any
    /// existing steps of the job.
    async fn insert_steps(&self, job_id: Uuid, steps: &[NewStep]) -> Result<Vec<Step>, StoreError>;

    /// All steps of a job ordered by `step_order`.
    async fn list_steps(&self, job_id: Uuid) -> Result<Vec<Step>, StoreError>;

    /// Set a step's status.
    async fn set_step_status(&self, step_id: Uuid, status: StepStatus) -> Result<(), StoreError>;

    /// Set a step's terminal status together with its structured result.
    async fn set_step_result(
        &self,
        step_id: Uuid,
        status: StepStatus,
        result: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Reset every `running` step of the given jobs back to `pending`.
    /// Returns the number of steps reset.
    async fn reset_running_steps(&self, job_ids: &[Uuid]) -> Result<u64, StoreError>;

    // ── Notes and sources ──

    /// Append a note. Notes are never updated or deleted while a job lives.
    async fn insert_note(&self, note: NewNote) -> Result<Note, StoreError>;

    /// All notes of a job in creation order.
    async fn list_notes(&self, job_id: Uuid) -> Result<Vec<Note>, StoreError>;

    /// Attach a source to a note.
    async fn insert_source(&self, source: NewSource) -> Result<Source, StoreError>;

    /// All sources of a job (joined through notes) in creation order.
    async fn list_sources_for_job(&self, job_id: Uuid) -> Result<Vec<Source>, StoreError>;

    // ── Citation ledger ──

    /// Look up a ledger entry by its stable source hash.
    async fn find_citation(
        &self,
        job_id: Uuid,
        source_hash: &str,
    ) -> Result<Option<LedgerEntry>, StoreError>;

    /// Highest citation number assigned for a job, 0 when the ledger is empty.
    async fn max_citation_number(&self, job_id: Uuid) -> Result<u32, StoreError>;

    /// Insert a ledger entry claiming a specific citation number.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CitationConflict`] when a concurrent writer
    /// already took the number or the hash.
    async fn insert_citation(&self, entry: NewLedgerEntry) -> Result<LedgerEntry, StoreError>;

    /// All ledger entries of a job ordered by citation number.
    async fn list_citations(&self, job_id: Uuid) -> Result<Vec<LedgerEntry>, StoreError>;

    // ── Section drafts ──

    /// Insert or replace the draft for `(job_id, section_key)`.
    async fn upsert_section_draft(
        &self,
        job_id: Uuid,
        key: SectionKey,
        status: DraftStatus,
        tokens: u32,
        content: &str,
        citation_map: &[CitationMapEntry],
    ) -> Result<SectionDraft, StoreError>;

    /// All section drafts of a job in report order.
    async fn list_section_drafts(&self, job_id: Uuid) -> Result<Vec<SectionDraft>, StoreError>;
}

/// Build the intake outcome for a new job: the admitted status and the
/// clarification prompts for whatever keys are missing.
pub(crate) fn intake_status(metadata: &Metadata) -> (JobStatus, Vec<String>) {
    let missing = crate::types::missing_clarification_keys(metadata);
    if missing.is_empty() {
        (JobStatus::Queued, Vec::new())
    } else {
        let prompts = missing
            .iter()
            .map(|key| format!("Please provide `{key}` for this research job."))
            .collect();
        (JobStatus::ClarificationRequired, prompts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intake_status_queued_when_complete() {
        let mut meta = Metadata::new();
        for key in crate::types::CLARIFICATION_KEYS {
            meta.insert(key.to_owned(), "value".to_owned());
        }
        let (status, prompts) = intake_status(&meta);
        assert_eq!(status, JobStatus::Queued);
        assert!(prompts.is_empty());
    }

    #[test]
    fn test_intake_status_withholds_incomplete() {
        let (status, prompts) = intake_status(&Metadata::new());
        assert_eq!(status, JobStatus::ClarificationRequired);
        assert_eq!(prompts.len(), 5);
        assert!(prompts[0].contains("time_horizon"));
    }
}
