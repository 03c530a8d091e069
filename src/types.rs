//! Core domain types shared across the store, engine, and tool gateway.
//!
//! Every durable entity (job, step, note, source, citation ledger entry,
//! section draft) lives here together with its status enums. Enums that are
//! persisted use the `as_str`/`parse` string mapping so the database never
//! sees a Rust-specific encoding.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata keys a job must carry before it is allowed to run.
///
/// A job created without all five is held in `clarification_required`
/// until the control plane resupplies them.
pub const CLARIFICATION_KEYS: [&str; 5] = [
    "time_horizon",
    "region_focus",
    "data_modalities",
    "integration_targets",
    "quality_constraints",
];

/// Free-form job metadata mapping.
pub type Metadata = BTreeMap<String, String>;

/// Return the clarification keys missing from a metadata mapping.
pub fn missing_clarification_keys(metadata: &Metadata) -> Vec<&'static str> {
    CLARIFICATION_KEYS
        .iter()
        .copied()
        .filter(|key| metadata.get(*key).map_or(true, |v| v.trim().is_empty()))
        .collect()
}

// ── Job ─────────────────────────────────────────────────────────

/// Lifecycle status of a research job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the shared queue for a worker slot.
    Queued,
    /// Claimed by a worker and executing.
    Running,
    /// Halted by the control plane; resumable.
    Paused,
    /// Halted by the control plane; terminal for the executor.
    Cancelled,
    /// Finished with a published report.
    Completed,
    /// Failed on a durable-store error.
    Error,
    /// Held until the intake metadata is resupplied.
    ClarificationRequired,
}

impl JobStatus {
    /// Returns the database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::ClarificationRequired => "clarification_required",
        }
    }

    /// Parse a database string into a status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "cancelled" => Some(Self::Cancelled),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            "clarification_required" => Some(Self::ClarificationRequired),
            _ => None,
        }
    }
}

/// Options accepted at job intake.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOptions {
    /// Research depth hint (e.g. "standard", "exhaustive").
    #[serde(default)]
    pub depth: Option<String>,
    /// Cap on the number of planned steps.
    #[serde(default)]
    pub max_steps: Option<u32>,
    /// Per-job execution budget in seconds, used by the rescue sweeper.
    #[serde(default)]
    pub max_duration_seconds: Option<u64>,
    /// Free-form tags for operator bookkeeping.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A research job row.
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job identifier.
    pub id: Uuid,
    /// The natural-language research question.
    pub question: String,
    /// Intake options.
    pub options: JobOptions,
    /// Free-form metadata including the clarification keys.
    pub metadata: Metadata,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job row was last written.
    pub updated_at: DateTime<Utc>,
    /// When the job first transitioned to running. Cleared on rescue.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached `completed`. Null for every other status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Liveness timestamp written on every durable pipeline write.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// The finalized report text. Set only on completion.
    pub final_report: Option<String>,
    /// Published asset descriptor. Set only on completion.
    pub report_assets: Option<ReportAssets>,
    /// Error text for status `error`.
    pub error: Option<String>,
}

/// Parameters for creating a job at intake.
#[derive(Debug, Clone)]
pub struct NewJob {
    /// The research question.
    pub question: String,
    /// Intake options.
    pub options: JobOptions,
    /// Caller-supplied metadata.
    pub metadata: Metadata,
}

/// Outcome of job intake.
#[derive(Debug, Clone)]
pub struct IntakeOutcome {
    /// The created job.
    pub job: Job,
    /// Clarification prompts for metadata keys that were missing.
    ///
    /// Empty when the job was admitted straight to the queue.
    pub clarification_prompts: Vec<String>,
}

// ── Report assets ───────────────────────────────────────────────

/// A single published report asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    /// Stable object key (e.g. `reports/{job_id}/report.md`).
    pub key: String,
    /// URL returned by the artifact store.
    pub url: String,
    /// Hex-encoded SHA-256 checksum of the asset bytes.
    pub sha256: String,
    /// Asset size in bytes.
    pub bytes: u64,
}

/// Structured descriptor of all published report assets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportAssets {
    /// The rendered Markdown report.
    pub markdown: AssetRef,
    /// The rendered PDF, when the artifact collaborator produced one.
    #[serde(default)]
    pub pdf: Option<AssetRef>,
    /// The rendered DOCX, when the artifact collaborator produced one.
    #[serde(default)]
    pub docx: Option<AssetRef>,
}

// ── Step ────────────────────────────────────────────────────────

/// Lifecycle status of a single research step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not started, or reset to restartable by the rescue sweeper.
    Pending,
    /// Currently executing.
    Running,
    /// Finished with sources and notes.
    Completed,
    /// Finished without useful results (e.g. no search hits).
    Partial,
    /// Failed on an unrecoverable step error.
    Error,
}

impl StepStatus {
    /// Returns the database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Error => "error",
        }
    }

    /// Parse a database string into a status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "partial" => Some(Self::Partial),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Whether a resuming executor should skip this step.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Partial | Self::Error)
    }
}

/// A planned research step row.
#[derive(Debug, Clone)]
pub struct Step {
    /// Unique step identifier.
    pub id: Uuid,
    /// Owning job.
    pub job_id: Uuid,
    /// Human-readable step title.
    pub title: String,
    /// Planner hint for which search tool to prefer.
    pub tool_hint: Option<String>,
    /// What the step is trying to establish.
    pub objective: Option<String>,
    /// Current lifecycle status.
    pub status: StepStatus,
    /// 1-based dense ordering within the job.
    pub step_order: u32,
    /// Optional grouping tag from the planner.
    pub theme: Option<String>,
    /// 0 for the original plan, ≥1 for planner expansions.
    pub iteration: u32,
    /// Structured result summary (e.g. source counts).
    pub result: Option<serde_json::Value>,
}

/// Parameters for inserting a planned step.
#[derive(Debug, Clone)]
pub struct NewStep {
    /// Step title.
    pub title: String,
    /// Planner tool hint.
    pub tool_hint: Option<String>,
    /// Step objective.
    pub objective: Option<String>,
    /// Optional theme tag.
    pub theme: Option<String>,
    /// Planner iteration this step belongs to.
    pub iteration: u32,
}

// ── Note ────────────────────────────────────────────────────────

/// The role a note plays in synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteRole {
    /// Summary of a single fetched page.
    PageSummary,
    /// Summary of a whole step's findings.
    StepSummary,
    /// Critic feedback recorded after synthesis.
    CriticNote,
    /// Archived summary of a completed job, used to warm-start later jobs.
    CrossJobSummary,
}

impl NoteRole {
    /// Returns the database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PageSummary => "page_summary",
            Self::StepSummary => "step_summary",
            Self::CriticNote => "critic_note",
            Self::CrossJobSummary => "cross_job_summary",
        }
    }

    /// Parse a database string into a role.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "page_summary" => Some(Self::PageSummary),
            "step_summary" => Some(Self::StepSummary),
            "critic_note" => Some(Self::CriticNote),
            "cross_job_summary" => Some(Self::CrossJobSummary),
            _ => None,
        }
    }
}

/// Importance floor and ceiling for notes.
pub const IMPORTANCE_RANGE: (u8, u8) = (1, 5);

/// Clamp a raw importance value into the valid range, defaulting to 3.
pub fn clamp_importance(raw: Option<i64>) -> u8 {
    let (lo, hi) = IMPORTANCE_RANGE;
    match raw {
        Some(v) if v < i64::from(lo) => lo,
        Some(v) if v > i64::from(hi) => hi,
        Some(v) => u8::try_from(v).unwrap_or(3),
        None => 3,
    }
}

/// An evidence note row. Notes are append-only.
#[derive(Debug, Clone)]
pub struct Note {
    /// Unique note identifier.
    pub id: Uuid,
    /// Owning job.
    pub job_id: Uuid,
    /// Producing step; null for job-level notes.
    pub step_id: Option<Uuid>,
    /// The note's synthesis role.
    pub role: NoteRole,
    /// Importance in 1..=5; drives context packing order.
    pub importance: u8,
    /// Estimated token count of `content`.
    pub token_count: u32,
    /// The note text.
    pub content: String,
    /// URL of the page this note summarizes, when applicable.
    pub source_url: Option<String>,
    /// When the note was created.
    pub created_at: DateTime<Utc>,
}

/// Parameters for inserting a note.
#[derive(Debug, Clone)]
pub struct NewNote {
    /// Owning job.
    pub job_id: Uuid,
    /// Producing step, if any.
    pub step_id: Option<Uuid>,
    /// Synthesis role.
    pub role: NoteRole,
    /// Importance in 1..=5.
    pub importance: u8,
    /// Estimated token count.
    pub token_count: u32,
    /// Note text.
    pub content: String,
    /// Source page URL, if any.
    pub source_url: Option<String>,
}

// ── Source ──────────────────────────────────────────────────────

/// A fetched document attached to a page-summary note.
#[derive(Debug, Clone)]
pub struct Source {
    /// Unique source identifier.
    pub id: Uuid,
    /// Owning note.
    pub note_id: Uuid,
    /// Document URL.
    pub url: String,
    /// Document title.
    pub title: String,
    /// Short excerpt from the search result.
    pub snippet: String,
    /// Pointer to the raw document in the artifact store.
    pub raw_storage_url: String,
    /// When the source was recorded.
    pub created_at: DateTime<Utc>,
}

/// Parameters for inserting a source.
#[derive(Debug, Clone)]
pub struct NewSource {
    /// Owning note.
    pub note_id: Uuid,
    /// Document URL.
    pub url: String,
    /// Document title.
    pub title: String,
    /// Search-result excerpt.
    pub snippet: String,
    /// Artifact store pointer for the raw document.
    pub raw_storage_url: String,
}

// ── Citation ledger ─────────────────────────────────────────────

/// A citation ledger row: one deduplicated source with its per-job number.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    /// Unique entry identifier.
    pub id: Uuid,
    /// Owning job.
    pub job_id: Uuid,
    /// Stable digest over `url|title|raw_storage_url`.
    pub source_hash: String,
    /// 1-based dense citation number within the job.
    pub citation_number: u32,
    /// Source title.
    pub title: String,
    /// Source URL.
    pub url: String,
    /// When the source was first cited.
    pub accessed_at: DateTime<Utc>,
}

/// Parameters for inserting a ledger entry.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    /// Owning job.
    pub job_id: Uuid,
    /// Stable source digest.
    pub source_hash: String,
    /// Citation number being claimed.
    pub citation_number: u32,
    /// Source title.
    pub title: String,
    /// Source URL.
    pub url: String,
}

// ── Section drafts ──────────────────────────────────────────────

/// The fixed set of report sections produced in longform mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKey {
    /// Opening summary of findings.
    ExecutiveSummary,
    /// Context and prior landscape.
    Background,
    /// The evidence-driven core of the report.
    Analysis,
    /// Actionable takeaways.
    Recommendations,
}

impl SectionKey {
    /// All section keys in report order.
    pub const ALL: [Self; 4] = [
        Self::ExecutiveSummary,
        Self::Background,
        Self::Analysis,
        Self::Recommendations,
    ];

    /// Returns the database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecutiveSummary => "executive_summary",
            Self::Background => "background",
            Self::Analysis => "analysis",
            Self::Recommendations => "recommendations",
        }
    }

    /// Parse a database string into a section key.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "executive_summary" => Some(Self::ExecutiveSummary),
            "background" => Some(Self::Background),
            "analysis" => Some(Self::Analysis),
            "recommendations" => Some(Self::Recommendations),
            _ => None,
        }
    }

    /// Human-readable heading used in the rendered report.
    pub fn heading(&self) -> &'static str {
        match self {
            Self::ExecutiveSummary => "Executive Summary",
            Self::Background => "Background",
            Self::Analysis => "Analysis",
            Self::Recommendations => "Recommendations",
        }
    }
}

/// Which notes contributed to a section, with their citation numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationMapEntry {
    /// The contributing note.
    pub note_id: Uuid,
    /// Citation numbers assigned to the note's sources.
    pub citation_numbers: Vec<u32>,
}

/// Completion status of a section draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    /// Draft row exists but content is not final.
    Pending,
    /// Section content is final.
    Completed,
}

impl DraftStatus {
    /// Returns the database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
        }
    }

    /// Parse a database string into a draft status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// A persisted fragment of the final report for one named section.
#[derive(Debug, Clone)]
pub struct SectionDraft {
    /// Unique draft identifier.
    pub id: Uuid,
    /// Owning job.
    pub job_id: Uuid,
    /// Which section this draft renders.
    pub section_key: SectionKey,
    /// Draft completion status.
    pub status: DraftStatus,
    /// Estimated token count of `content`.
    pub tokens: u32,
    /// Rendered section text with inline citation markers.
    pub content: String,
    /// Notes and citation numbers that fed the section.
    pub citation_map: Vec<CitationMapEntry>,
}
