//! Postgres implementation of the durable store.
//!
//! Queue claims rely on `FOR UPDATE SKIP LOCKED`; citation numbering and
//! section drafts rely on uniqueness constraints. All queries are runtime
//! bound (`sqlx::query` / `query_as`) so no database is needed at build time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::trace;
use uuid::Uuid;

use super::{intake_status, Store, StoreError};
use crate::types::{
    CitationMapEntry, DraftStatus, IntakeOutcome, Job, JobOptions, JobStatus, LedgerEntry,
    Metadata, NewJob, NewLedgerEntry, NewNote, NewSource, NewStep, Note, NoteRole, ReportAssets,
    SectionDraft, SectionKey, Source, Step, StepStatus,
};

/// Schema applied at startup. Idempotent.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS research_jobs (
    id              UUID PRIMARY KEY,
    question        TEXT NOT NULL,
    options         JSONB NOT NULL DEFAULT '{}'::jsonb,
    metadata        JSONB NOT NULL DEFAULT '{}'::jsonb,
    status          TEXT NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    started_at      TIMESTAMPTZ,
    completed_at    TIMESTAMPTZ,
    last_heartbeat  TIMESTAMPTZ,
    final_report    TEXT,
    report_assets   JSONB,
    error           TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON research_jobs(status, created_at);

CREATE TABLE IF NOT EXISTS research_steps (
    id              UUID PRIMARY KEY,
    job_id          UUID NOT NULL REFERENCES research_jobs(id) ON DELETE CASCADE,
    title           TEXT NOT NULL,
    tool_hint       TEXT,
    objective       TEXT,
    status          TEXT NOT NULL,
    step_order      INTEGER NOT NULL,
    theme           TEXT,
    iteration       INTEGER NOT NULL DEFAULT 0,
    result          JSONB,
    UNIQUE (job_id, step_order)
);

CREATE INDEX IF NOT EXISTS idx_steps_job ON research_steps(job_id, step_order);

CREATE TABLE IF NOT EXISTS research_notes (
    id              UUID PRIMARY KEY,
    job_id          UUID NOT NULL REFERENCES research_jobs(id) ON DELETE CASCADE,
    step_id         UUID REFERENCES research_steps(id) ON DELETE SET NULL,
    role            TEXT NOT NULL,
    importance      INTEGER NOT NULL,
    token_count     INTEGER NOT NULL,
    content         TEXT NOT NULL,
    source_url      TEXT,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_notes_job ON research_notes(job_id, created_at);

CREATE TABLE IF NOT EXISTS research_sources (
    id              UUID PRIMARY KEY,
    note_id         UUID NOT NULL REFERENCES research_notes(id) ON DELETE CASCADE,
    url             TEXT NOT NULL,
    title           TEXT NOT NULL,
    snippet         TEXT NOT NULL,
    raw_storage_url TEXT NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS citation_ledger (
    id              UUID PRIMARY KEY,
    job_id          UUID NOT NULL REFERENCES research_jobs(id) ON DELETE CASCADE,
    source_hash     TEXT NOT NULL,
    citation_number INTEGER NOT NULL,
    title           TEXT NOT NULL,
    url             TEXT NOT NULL,
    accessed_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (job_id, source_hash),
    UNIQUE (job_id, citation_number)
);

CREATE TABLE IF NOT EXISTS section_drafts (
    id              UUID PRIMARY KEY,
    job_id          UUID NOT NULL REFERENCES research_jobs(id) ON DELETE CASCADE,
    section_key     TEXT NOT NULL,
    status          TEXT NOT NULL,
    tokens          INTEGER NOT NULL DEFAULT 0,
    content         TEXT NOT NULL DEFAULT '',
    citation_map    JSONB NOT NULL DEFAULT '[]'::jsonb,
    UNIQUE (job_id, section_key)
);
"#;

/// Columns selected for job rows, in [`JobRow`] order.
const JOB_COLUMNS: &str = "id, question, options, metadata, status, created_at, updated_at, \
     started_at, completed_at, last_heartbeat, final_report, report_assets, error";

/// Row type returned by job queries.
type JobRow = (
    Uuid,
    String,
    serde_json::Value,
    serde_json::Value,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
    Option<String>,
    Option<serde_json::Value>,
    Option<String>,
);

/// Row type returned by step queries.
type StepRow = (
    Uuid,
    Uuid,
    String,
    Option<String>,
    Option<String>,
    String,
    i32,
    Option<String>,
    i32,
    Option<serde_json::Value>,
);

/// Row type returned by note queries.
type NoteRow = (
    Uuid,
    Uuid,
    Option<Uuid>,
    String,
    i32,
    i32,
    String,
    Option<String>,
    DateTime<Utc>,
);

/// Row type returned by source queries.
type SourceRow = (Uuid, Uuid, String, String, String, String, DateTime<Utc>);

/// Row type returned by ledger queries.
type LedgerRow = (Uuid, Uuid, String, i32, String, String, DateTime<Utc>);

/// Row type returned by section draft queries.
type DraftRow = (Uuid, Uuid, String, String, i32, String, serde_json::Value);

fn job_from_row(row: JobRow) -> Result<Job, StoreError> {
    let status = JobStatus::parse(&row.4)
        .ok_or_else(|| StoreError::Decode(format!("unknown job status: {}", row.4)))?;
    let options: JobOptions = serde_json::from_value(row.2)
        .map_err(|e| StoreError::Decode(format!("job options: {e}")))?;
    let metadata: Metadata = serde_json::from_value(row.3)
        .map_err(|e| StoreError::Decode(format!("job metadata: {e}")))?;
    let report_assets = match row.11 {
        Some(value) => Some(
            serde_json::from_value::<ReportAssets>(value)
                .map_err(|e| StoreError::Decode(format!("report assets: {e}")))?,
        ),
        None => None,
    };
    Ok(Job {
        id: row.0,
        question: row.1,
        options,
        metadata,
        status,
        created_at: row.5,
        updated_at: row.6,
        started_at: row.7,
        completed_at: row.8,
        last_heartbeat: row.9,
        final_report: row.10,
        report_assets,
        error: row.12,
    })
}

fn step_from_row(row: StepRow) -> Result<Step, StoreError> {
    let status = StepStatus::parse(&row.5)
        .ok_or_else(|| StoreError::Decode(format!("unknown step status: {}", row.5)))?;
    Ok(Step {
        id: row.0,
        job_id: row.1,
        title: row.2,
        tool_hint: row.3,
        objective: row.4,
        status,
        step_order: u32::try_from(row.6).map_err(|_| {
            StoreError::Decode(format!("negative step_order: {}", row.6))
        })?,
        theme: row.7,
        iteration: u32::try_from(row.8).unwrap_or(0),
        result: row.9,
    })
}

fn note_from_row(row: NoteRow) -> Result<Note, StoreError> {
    let role = NoteRole::parse(&row.3)
        .ok_or_else(|| StoreError::Decode(format!("unknown note role: {}", row.3)))?;
    Ok(Note {
        id: row.0,
        job_id: row.1,
        step_id: row.2,
        role,
        importance: u8::try_from(row.4).unwrap_or(3),
        token_count: u32::try_from(row.5).unwrap_or(0),
        content: row.6,
        source_url: row.7,
        created_at: row.8,
    })
}

fn ledger_from_row(row: LedgerRow) -> Result<LedgerEntry, StoreError> {
    Ok(LedgerEntry {
        id: row.0,
        job_id: row.1,
        source_hash: row.2,
        citation_number: u32::try_from(row.3).map_err(|_| {
            StoreError::Decode(format!("negative citation number: {}", row.3))
        })?,
        title: row.4,
        url: row.5,
        accessed_at: row.6,
    })
}

fn draft_from_row(row: DraftRow) -> Result<SectionDraft, StoreError> {
    let section_key = SectionKey::parse(&row.2)
        .ok_or_else(|| StoreError::Decode(format!("unknown section key: {}", row.2)))?;
    let status = DraftStatus::parse(&row.3)
        .ok_or_else(|| StoreError::Decode(format!("unknown draft status: {}", row.3)))?;
    let citation_map: Vec<CitationMapEntry> = serde_json::from_value(row.6)
        .map_err(|e| StoreError::Decode(format!("citation map: {e}")))?;
    Ok(SectionDraft {
        id: row.0,
        job_id: row.1,
        section_key,
        status,
        tokens: u32::try_from(row.4).unwrap_or(0),
        content: row.5,
        citation_map,
    })
}

/// Postgres-backed durable store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to Postgres and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when the connection or schema
    /// application fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool, applying the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] when schema application fails.
    pub async fn from_pool(pool: PgPool) -> Result<Self, StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_job(&self, new: NewJob) -> Result<IntakeOutcome, StoreError> {
        let (status, clarification_prompts) = intake_status(&new.metadata);
        let id = Uuid::new_v4();
        let options = serde_json::to_value(&new.options)
            .map_err(|e| StoreError::Decode(format!("job options: {e}")))?;
        let metadata = serde_json::to_value(&new.metadata)
            .map_err(|e| StoreError::Decode(format!("job metadata: {e}")))?;

        let row: JobRow = sqlx::query_as(&format!(
            "INSERT INTO research_jobs (id, question, options, metadata, status) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {JOB_COLUMNS}"
        ))
        .bind(id)
        .bind(&new.question)
        .bind(options)
        .bind(metadata)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;

        trace!(job_id = %id, status = status.as_str(), "job created");
        Ok(IntakeOutcome {
            job: job_from_row(row)?,
            clarification_prompts,
        })
    }

    async fn get_job(&self, id: Uuid) -> Result<Job, StoreError> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM research_jobs WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        job_from_row(row.ok_or(StoreError::JobNotFound(id))?)
    }

    async fn claim_next_job(&self) -> Result<Option<Job>, StoreError> {
        // Single-statement claim: the subquery locks one queued row while
        // skipping rows locked by concurrent claimers.
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "UPDATE research_jobs \
             SET status = 'running', started_at = now(), updated_at = now(), \
                 last_heartbeat = now() \
             WHERE id = (SELECT id FROM research_jobs WHERE status = 'queued' \
                         ORDER BY created_at LIMIT 1 FOR UPDATE SKIP LOCKED) \
             RETURNING {JOB_COLUMNS}"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.map(job_from_row).transpose()
    }

    async fn set_job_status(&self, id: Uuid, status: JobStatus) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE research_jobs SET status = $1, updated_at = now() WHERE id = $2")
                .bind(status.as_str())
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(id));
        }
        Ok(())
    }

    async fn heartbeat_job(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE research_jobs SET last_heartbeat = now(), updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_job_error(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE research_jobs SET status = 'error', error = $1, updated_at = now() \
             WHERE id = $2",
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_job(
        &self,
        id: Uuid,
        final_report: &str,
        assets: &ReportAssets,
    ) -> Result<(), StoreError> {
        let assets_json = serde_json::to_value(assets)
            .map_err(|e| StoreError::Decode(format!("report assets: {e}")))?;
        sqlx::query(
            "UPDATE research_jobs \
             SET status = 'completed', final_report = $1, report_assets = $2, \
                 completed_at = now(), last_heartbeat = now(), updated_at = now() \
             WHERE id = $3",
        )
        .bind(final_report)
        .bind(assets_json)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn requeue_job(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE research_jobs \
             SET status = 'queued', started_at = NULL, last_heartbeat = now(), \
                 updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reactivate_job(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE research_jobs \
             SET status = 'queued', final_report = NULL, report_assets = NULL, \
                 completed_at = NULL, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_running_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM research_jobs WHERE status = 'running' \
             ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(job_from_row).collect()
    }

    async fn resupply_metadata(&self, id: Uuid, extra: &Metadata) -> Result<Job, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM research_jobs WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let mut job = job_from_row(row.ok_or(StoreError::JobNotFound(id))?)?;

        for (key, value) in extra {
            job.metadata.insert(key.clone(), value.clone());
        }
        let next_status = if job.status == JobStatus::ClarificationRequired
            && crate::types::missing_clarification_keys(&job.metadata).is_empty()
        {
            JobStatus::Queued
        } else {
            job.status
        };

        let metadata_json = serde_json::to_value(&job.metadata)
            .map_err(|e| StoreError::Decode(format!("job metadata: {e}")))?;
        sqlx::query(
            "UPDATE research_jobs SET metadata = $1, status = $2, updated_at = now() \
             WHERE id = $3",
        )
        .bind(metadata_json)
        .bind(next_status.as_str())
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        job.status = next_status;
        Ok(job)
    }

    async fn insert_steps(&self, job_id: Uuid, steps: &[NewStep]) -> Result<Vec<Step>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let (max_order,): (i32,) = sqlx::query_as(
            "SELECT COALESCE(MAX(step_order), 0) FROM research_steps WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;

        let mut inserted = Vec::with_capacity(steps.len());
        for (offset, step) in steps.iter().enumerate() {
            let order = i64::from(max_order)
                .saturating_add(1)
                .saturating_add(i64::try_from(offset).unwrap_or(i64::MAX));
            let row: StepRow = sqlx::query_as(
                "INSERT INTO research_steps \
                 (id, job_id, title, tool_hint, objective, status, step_order, theme, iteration) \
                 VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7, $8) \
                 RETURNING id, job_id, title, tool_hint, objective, status, step_order, theme, \
                           iteration, result",
            )
            .bind(Uuid::new_v4())
            .bind(job_id)
            .bind(&step.title)
            .bind(&step.tool_hint)
            .bind(&step.objective)
            .bind(i32::try_from(order).unwrap_or(i32::MAX))
            .bind(&step.theme)
            .bind(i32::try_from(step.iteration).unwrap_or(0))
            .fetch_one(&mut *tx)
            .await?;
            inserted.push(step_from_row(row)?);
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn list_steps(&self, job_id: Uuid) -> Result<Vec<Step>, StoreError> {
        let rows: Vec<StepRow> = sqlx::query_as(
            "SELECT id, job_id, title, tool_hint, objective, status, step_order, theme, \
                    iteration, result \
             FROM research_steps WHERE job_id = $1 ORDER BY step_order",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(step_from_row).collect()
    }

    async fn set_step_status(&self, step_id: Uuid, status: StepStatus) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE research_steps SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(step_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::StepNotFound(step_id));
        }
        Ok(())
    }

    async fn set_step_result(
        &self,
        step_id: Uuid,
        status: StepStatus,
        result: serde_json::Value,
    ) -> Result<(), StoreError> {
        let outcome =
            sqlx::query("UPDATE research_steps SET status = $1, result = $2 WHERE id = $3")
                .bind(status.as_str())
                .bind(result)
                .bind(step_id)
                .execute(&self.pool)
                .await?;
        if outcome.rows_affected() == 0 {
            return Err(StoreError::StepNotFound(step_id));
        }
        Ok(())
    }

    async fn reset_running_steps(&self, job_ids: &[Uuid]) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE research_steps SET status = 'pending' \
             WHERE job_id = ANY($1) AND status = 'running'",
        )
        .bind(job_ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_note(&self, note: NewNote) -> Result<Note, StoreError> {
        let row: NoteRow = sqlx::query_as(
            "INSERT INTO research_notes \
             (id, job_id, step_id, role, importance, token_count, content, source_url) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id, job_id, step_id, role, importance, token_count, content, \
                       source_url, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(note.job_id)
        .bind(note.step_id)
        .bind(note.role.as_str())
        .bind(i32::from(note.importance))
        .bind(i32::try_from(note.token_count).unwrap_or(i32::MAX))
        .bind(&note.content)
        .bind(&note.source_url)
        .fetch_one(&self.pool)
        .await?;
        note_from_row(row)
    }

    async fn list_notes(&self, job_id: Uuid) -> Result<Vec<Note>, StoreError> {
        let rows: Vec<NoteRow> = sqlx::query_as(
            "SELECT id, job_id, step_id, role, importance, token_count, content, source_url, \
                    created_at \
             FROM research_notes WHERE job_id = $1 ORDER BY created_at, id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(note_from_row).collect()
    }

    async fn insert_source(&self, source: NewSource) -> Result<Source, StoreError> {
        let row: SourceRow = sqlx::query_as(
            "INSERT INTO research_sources (id, note_id, url, title, snippet, raw_storage_url) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, note_id, url, title, snippet, raw_storage_url, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(source.note_id)
        .bind(&source.url)
        .bind(&source.title)
        .bind(&source.snippet)
        .bind(&source.raw_storage_url)
        .fetch_one(&self.pool)
        .await?;
        Ok(Source {
            id: row.0,
            note_id: row.1,
            url: row.2,
            title: row.3,
            snippet: row.4,
            raw_storage_url: row.5,
            created_at: row.6,
        })
    }

    async fn list_sources_for_job(&self, job_id: Uuid) -> Result<Vec<Source>, StoreError> {
        let rows: Vec<SourceRow> = sqlx::query_as(
            "SELECT s.id, s.note_id, s.url, s.title, s.snippet, s.raw_storage_url, s.created_at \
             FROM research_sources s \
             JOIN research_notes n ON n.id = s.note_id \
             WHERE n.job_id = $1 ORDER BY s.created_at, s.id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| Source {
                id: row.0,
                note_id: row.1,
                url: row.2,
                title: row.3,
                snippet: row.4,
                raw_storage_url: row.5,
                created_at: row.6,
            })
            .collect())
    }

    async fn find_citation(
        &self,
        job_id: Uuid,
        source_hash: &str,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let row: Option<LedgerRow> = sqlx::query_as(
            "SELECT id, job_id, source_hash, citation_number, title, url, accessed_at \
             FROM citation_ledger WHERE job_id = $1 AND source_hash = $2",
        )
        .bind(job_id)
        .bind(source_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.map(ledger_from_row).transpose()
    }

    async fn max_citation_number(&self, job_id: Uuid) -> Result<u32, StoreError> {
        let (max,): (i32,) = sqlx::query_as(
            "SELECT COALESCE(MAX(citation_number), 0) FROM citation_ledger WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(u32::try_from(max).unwrap_or(0))
    }

    async fn insert_citation(&self, entry: NewLedgerEntry) -> Result<LedgerEntry, StoreError> {
        let result: Result<LedgerRow, sqlx::Error> = sqlx::query_as(
            "INSERT INTO citation_ledger \
             (id, job_id, source_hash, citation_number, title, url) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, job_id, source_hash, citation_number, title, url, accessed_at",
        )
        .bind(Uuid::new_v4())
        .bind(entry.job_id)
        .bind(&entry.source_hash)
        .bind(i32::try_from(entry.citation_number).unwrap_or(i32::MAX))
        .bind(&entry.title)
        .bind(&entry.url)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => ledger_from_row(row),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::CitationConflict {
                    job_id: entry.job_id,
                    citation_number: entry.citation_number,
                })
            }
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    async fn list_citations(&self, job_id: Uuid) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows: Vec<LedgerRow> = sqlx::query_as(
            "SELECT id, job_id, source_hash, citation_number, title, url, accessed_at \
             FROM citation_ledger WHERE job_id = $1 ORDER BY citation_number",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ledger_from_row).collect()
    }

    async fn upsert_section_draft(
        &self,
        job_id: Uuid,
        key: SectionKey,
        status: DraftStatus,
        tokens: u32,
        content: &str,
        citation_map: &[CitationMapEntry],
    ) -> Result<SectionDraft, StoreError> {
        let map_json = serde_json::to_value(citation_map)
            .map_err(|e| StoreError::Decode(format!("citation map: {e}")))?;
        let row: DraftRow = sqlx::query_as(
            "INSERT INTO section_drafts \
             (id, job_id, section_key, status, tokens, content, citation_map) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (job_id, section_key) DO UPDATE \
             SET status = EXCLUDED.status, tokens = EXCLUDED.tokens, \
                 content = EXCLUDED.content, citation_map = EXCLUDED.citation_map \
             RETURNING id, job_id, section_key, status, tokens, content, citation_map",
        )
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(key.as_str())
        .bind(status.as_str())
        .bind(i32::try_from(tokens).unwrap_or(i32::MAX))
        .bind(content)
        .bind(map_json)
        .fetch_one(&self.pool)
        .await?;
        draft_from_row(row)
    }

    async fn list_section_drafts(&self, job_id: Uuid) -> Result<Vec<SectionDraft>, StoreError> {
        let rows: Vec<DraftRow> = sqlx::query_as(
            "SELECT id, job_id, section_key, status, tokens, content, citation_map \
             FROM section_drafts WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        let mut drafts = rows
            .into_iter()
            .map(draft_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        drafts.sort_by_key(|d| {
            SectionKey::ALL
                .iter()
                .position(|k| *k == d.section_key)
                .unwrap_or(usize::MAX)
        });
        Ok(drafts)
    }
}
