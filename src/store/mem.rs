//! In-memory implementation of the durable store.
//!
//! Backs tests and dry runs. A single mutex guards all tables, which makes
//! every operation atomic — the same observable semantics the Postgres
//! backend gets from row locking and uniqueness constraints.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{intake_status, Store, StoreError};
use crate::types::{
    CitationMapEntry, DraftStatus, IntakeOutcome, Job, JobStatus, LedgerEntry, Metadata, NewJob,
    NewLedgerEntry, NewNote, NewSource, NewStep, Note, ReportAssets, SectionDraft, SectionKey,
    Source, Step, StepStatus,
};

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    steps: Vec<Step>,
    notes: Vec<Note>,
    sources: Vec<Source>,
    ledger: Vec<LedgerEntry>,
    drafts: Vec<SectionDraft>,
}

/// Mutex-guarded in-memory store.
#[derive(Debug, Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Mutex poisoning only happens when a holder panicked; propagate the
        // inner state anyway so tests can still observe it.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Overwrite a job's `last_heartbeat`, for stall scenarios in tests.
    pub fn backdate_heartbeat(&self, id: Uuid, heartbeat: chrono::DateTime<Utc>) {
        let mut inner = self.lock();
        if let Some(job) = inner.jobs.get_mut(&id) {
            job.last_heartbeat = Some(heartbeat);
            job.updated_at = heartbeat;
            job.started_at = job.started_at.map(|_| heartbeat);
        }
    }
}

#[async_trait]
impl Store for MemStore {
    async fn create_job(&self, new: NewJob) -> Result<IntakeOutcome, StoreError> {
        let (status, clarification_prompts) = intake_status(&new.metadata);
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            question: new.question,
            options: new.options,
            metadata: new.metadata,
            status,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            last_heartbeat: None,
            final_report: None,
            report_assets: None,
            error: None,
        };
        self.lock().jobs.insert(job.id, job.clone());
        Ok(IntakeOutcome {
            job,
            clarification_prompts,
        })
    }

    async fn get_job(&self, id: Uuid) -> Result<Job, StoreError> {
        self.lock()
            .jobs
            .get(&id)
            .cloned()
            .ok_or(StoreError::JobNotFound(id))
    }

    async fn claim_next_job(&self) -> Result<Option<Job>, StoreError> {
        let mut inner = self.lock();
        let candidate = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .min_by_key(|j| (j.created_at, j.id))
            .map(|j| j.id);
        let Some(id) = candidate else {
            return Ok(None);
        };
        let now = Utc::now();
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or(StoreError::JobNotFound(id))?;
        job.status = JobStatus::Running;
        job.started_at = Some(now);
        job.updated_at = now;
        job.last_heartbeat = Some(now);
        Ok(Some(job.clone()))
    }

    async fn set_job_status(&self, id: Uuid, status: JobStatus) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or(StoreError::JobNotFound(id))?;
        job.status = status;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn heartbeat_job(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or(StoreError::JobNotFound(id))?;
        let now = Utc::now();
        job.last_heartbeat = Some(now);
        job.updated_at = now;
        Ok(())
    }

    async fn set_job_error(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or(StoreError::JobNotFound(id))?;
        job.status = JobStatus::Error;
        job.error = Some(error.to_owned());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn complete_job(
        &self,
        id: Uuid,
        final_report: &str,
        assets: &ReportAssets,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or(StoreError::JobNotFound(id))?;
        let now = Utc::now();
        job.status = JobStatus::Completed;
        job.final_report = Some(final_report.to_owned());
        job.report_assets = Some(assets.clone());
        job.completed_at = Some(now);
        job.last_heartbeat = Some(now);
        job.updated_at = now;
        Ok(())
    }

    async fn requeue_job(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or(StoreError::JobNotFound(id))?;
        let now = Utc::now();
        job.status = JobStatus::Queued;
        job.started_at = None;
        job.last_heartbeat = Some(now);
        job.updated_at = now;
        Ok(())
    }

    async fn reactivate_job(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or(StoreError::JobNotFound(id))?;
        job.status = JobStatus::Queued;
        job.final_report = None;
        job.report_assets = None;
        job.completed_at = None;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn list_running_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let inner = self.lock();
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Running)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.created_at, j.id));
        Ok(jobs)
    }

    async fn resupply_metadata(&self, id: Uuid, extra: &Metadata) -> Result<Job, StoreError> {
        let mut inner = self.lock();
        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or(StoreError::JobNotFound(id))?;
        for (key, value) in extra {
            job.metadata.insert(key.clone(), value.clone());
        }
        if job.status == JobStatus::ClarificationRequired
            && crate::types::missing_clarification_keys(&job.metadata).is_empty()
        {
            job.status = JobStatus::Queued;
        }
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn insert_steps(&self, job_id: Uuid, steps: &[NewStep]) -> Result<Vec<Step>, StoreError> {
        let mut inner = self.lock();
        if !inner.jobs.contains_key(&job_id) {
            return Err(StoreError::JobNotFound(job_id));
        }
        let max_order = inner
            .steps
            .iter()
            .filter(|s| s.job_id == job_id)
            .map(|s| s.step_order)
            .max()
            .unwrap_or(0);
        let mut inserted = Vec::with_capacity(steps.len());
        for (offset, step) in steps.iter().enumerate() {
            let order = max_order
                .saturating_add(1)
                .saturating_add(u32::try_from(offset).unwrap_or(u32::MAX));
            let row = Step {
                id: Uuid::new_v4(),
                job_id,
                title: step.title.clone(),
                tool_hint: step.tool_hint.clone(),
                objective: step.objective.clone(),
                status: StepStatus::Pending,
                step_order: order,
                theme: step.theme.clone(),
                iteration: step.iteration,
                result: None,
            };
            inner.steps.push(row.clone());
            inserted.push(row);
        }
        Ok(inserted)
    }

    async fn list_steps(&self, job_id: Uuid) -> Result<Vec<Step>, StoreError> {
        let inner = self.lock();
        let mut steps: Vec<Step> = inner
            .steps
            .iter()
            .filter(|s| s.job_id == job_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.step_order);
        Ok(steps)
    }

    async fn set_step_status(&self, step_id: Uuid, status: StepStatus) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let step = inner
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or(StoreError::StepNotFound(step_id))?;
        step.status = status;
        Ok(())
    }

    async fn set_step_result(
        &self,
        step_id: Uuid,
        status: StepStatus,
        result: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let step = inner
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or(StoreError::StepNotFound(step_id))?;
        step.status = status;
        step.result = Some(result);
        Ok(())
    }

    async fn reset_running_steps(&self, job_ids: &[Uuid]) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let mut reset = 0u64;
        for step in inner
            .steps
            .iter_mut()
            .filter(|s| job_ids.contains(&s.job_id) && s.status == StepStatus::Running)
        {
            step.status = StepStatus::Pending;
            reset = reset.saturating_add(1);
        }
        Ok(reset)
    }

    async fn insert_note(&self, note: NewNote) -> Result<Note, StoreError> {
        let mut inner = self.lock();
        if !inner.jobs.contains_key(&note.job_id) {
            return Err(StoreError::JobNotFound(note.job_id));
        }
        let row = Note {
            id: Uuid::new_v4(),
            job_id: note.job_id,
            step_id: note.step_id,
            role: note.role,
            importance: note.importance,
            token_count: note.token_count,
            content: note.content,
            source_url: note.source_url,
            created_at: Utc::now(),
        };
        inner.notes.push(row.clone());
        Ok(row)
    }

    async fn list_notes(&self, job_id: Uuid) -> Result<Vec<Note>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .notes
            .iter()
            .filter(|n| n.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn insert_source(&self, source: NewSource) -> Result<Source, StoreError> {
        let mut inner = self.lock();
        let row = Source {
            id: Uuid::new_v4(),
            note_id: source.note_id,
            url: source.url,
            title: source.title,
            snippet: source.snippet,
            raw_storage_url: source.raw_storage_url,
            created_at: Utc::now(),
        };
        inner.sources.push(row.clone());
        Ok(row)
    }

    async fn list_sources_for_job(&self, job_id: Uuid) -> Result<Vec<Source>, StoreError> {
        let inner = self.lock();
        let note_ids: Vec<Uuid> = inner
            .notes
            .iter()
            .filter(|n| n.job_id == job_id)
            .map(|n| n.id)
            .collect();
        Ok(inner
            .sources
            .iter()
            .filter(|s| note_ids.contains(&s.note_id))
            .cloned()
            .collect())
    }

    async fn find_citation(
        &self,
        job_id: Uuid,
        source_hash: &str,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .ledger
            .iter()
            .find(|e| e.job_id == job_id && e.source_hash == source_hash)
            .cloned())
    }

    async fn max_citation_number(&self, job_id: Uuid) -> Result<u32, StoreError> {
        let inner = self.lock();
        Ok(inner
            .ledger
            .iter()
            .filter(|e| e.job_id == job_id)
            .map(|e| e.citation_number)
            .max()
            .unwrap_or(0))
    }

    async fn insert_citation(&self, entry: NewLedgerEntry) -> Result<LedgerEntry, StoreError> {
        let mut inner = self.lock();
        let conflict = inner.ledger.iter().any(|e| {
            e.job_id == entry.job_id
                && (e.source_hash == entry.source_hash
                    || e.citation_number == entry.citation_number)
        });
        if conflict {
            return Err(StoreError::CitationConflict {
                job_id: entry.job_id,
                citation_number: entry.citation_number,
            });
        }
        let row = LedgerEntry {
            id: Uuid::new_v4(),
            job_id: entry.job_id,
            source_hash: entry.source_hash,
            citation_number: entry.citation_number,
            title: entry.title,
            url: entry.url,
            accessed_at: Utc::now(),
        };
        inner.ledger.push(row.clone());
        Ok(row)
    }

    async fn list_citations(&self, job_id: Uuid) -> Result<Vec<LedgerEntry>, StoreError> {
        let inner = self.lock();
        let mut entries: Vec<LedgerEntry> = inner
            .ledger
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.citation_number);
        Ok(entries)
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
        let mut inner = self.lock();
        let draft = SectionDraft {
            id: Uuid::new_v4(),
            job_id,
            section_key: key,
            status,
            tokens,
            content: content.to_owned(),
            citation_map: citation_map.to_vec(),
        };
        if let Some(existing) = inner
            .drafts
            .iter_mut()
            .find(|d| d.job_id == job_id && d.section_key == key)
        {
            let id = existing.id;
            *existing = SectionDraft { id, ..draft.clone() };
            return Ok(existing.clone());
        }
        inner.drafts.push(draft.clone());
        Ok(draft)
    }

    async fn list_section_drafts(&self, job_id: Uuid) -> Result<Vec<SectionDraft>, StoreError> {
        let inner = self.lock();
        let mut drafts: Vec<SectionDraft> = inner
            .drafts
            .iter()
            .filter(|d| d.job_id == job_id)
            .cloned()
            .collect();
        drafts.sort_by_key(|d| {
            SectionKey::ALL
                .iter()
                .position(|k| *k == d.section_key)
                .unwrap_or(usize::MAX)
        });
        Ok(drafts)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn complete_metadata() -> Metadata {
        let mut meta = Metadata::new();
        for key in crate::types::CLARIFICATION_KEYS {
            meta.insert(key.to_owned(), "value".to_owned());
        }
        meta
    }

    fn queued_job(question: &str) -> NewJob {
        NewJob {
            question: question.to_owned(),
            options: Default::default(),
            metadata: complete_metadata(),
        }
    }

    #[tokio::test]
    async fn test_intake_withholds_unclarified_job() {
        let store = MemStore::new();
        let outcome = store
            .create_job(NewJob {
                question: "impact of EU AI Act on model providers".to_owned(),
                options: Default::default(),
                metadata: Metadata::new(),
            })
            .await
            .expect("create");
        assert_eq!(outcome.job.status, JobStatus::ClarificationRequired);
        assert_eq!(outcome.clarification_prompts.len(), 5);

        // Clarified jobs may not be claimed.
        assert!(store.claim_next_job().await.expect("claim").is_none());
    }

    #[tokio::test]
    async fn test_resupply_metadata_admits_job() {
        let store = MemStore::new();
        let outcome = store
            .create_job(NewJob {
                question: "q".to_owned(),
                options: Default::default(),
                metadata: Metadata::new(),
            })
            .await
            .expect("create");

        let job = store
            .resupply_metadata(outcome.job.id, &complete_metadata())
            .await
            .expect("resupply");
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_claim_sets_running_fields() {
        let store = MemStore::new();
        let outcome = store.create_job(queued_job("q")).await.expect("create");

        let claimed = store
            .claim_next_job()
            .await
            .expect("claim")
            .expect("job available");
        assert_eq!(claimed.id, outcome.job.id);
        assert_eq!(claimed.status, JobStatus::Running);
        assert!(claimed.started_at.is_some());
        assert!(claimed.last_heartbeat.is_some());
    }

    /// Claim race: K concurrent claimers over Q queued jobs leave exactly
    /// min(K, Q) jobs running, each owned by one claimer.
    #[tokio::test]
    async fn test_concurrent_claimers_claim_distinct_jobs() {
        let store = Arc::new(MemStore::new());
        for i in 0..3 {
            store
                .create_job(queued_job(&format!("q{i}")))
                .await
                .expect("create");
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(
                async move { store.claim_next_job().await },
            ));
        }
        let mut claimed = Vec::new();
        for handle in handles {
            if let Some(job) = handle.await.expect("join").expect("claim") {
                claimed.push(job.id);
            }
        }

        claimed.sort();
        claimed.dedup();
        assert_eq!(claimed.len(), 3, "each queued job claimed exactly once");

        let running = store.list_running_jobs().await.expect("list");
        assert_eq!(running.len(), 3);
    }

    #[tokio::test]
    async fn test_step_order_dense_across_inserts() {
        let store = MemStore::new();
        let job = store.create_job(queued_job("q")).await.expect("create").job;

        let first = store
            .insert_steps(
                job.id,
                &[
                    NewStep {
                        title: "a".to_owned(),
                        tool_hint: None,
                        objective: None,
                        theme: None,
                        iteration: 0,
                    },
                    NewStep {
                        title: "b".to_owned(),
                        tool_hint: None,
                        objective: None,
                        theme: None,
                        iteration: 0,
                    },
                ],
            )
            .await
            .expect("insert");
        let second = store
            .insert_steps(
                job.id,
                &[NewStep {
                    title: "c".to_owned(),
                    tool_hint: None,
                    objective: None,
                    theme: None,
                    iteration: 1,
                }],
            )
            .await
            .expect("insert expansion");

        let orders: Vec<u32> = first
            .iter()
            .chain(second.iter())
            .map(|s| s.step_order)
            .collect();
        assert_eq!(orders, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_citation_uniqueness_enforced() {
        let store = MemStore::new();
        let job = store.create_job(queued_job("q")).await.expect("create").job;

        store
            .insert_citation(NewLedgerEntry {
                job_id: job.id,
                source_hash: "h1".to_owned(),
                citation_number: 1,
                title: "t".to_owned(),
                url: "u".to_owned(),
            })
            .await
            .expect("first insert");

        let err = store
            .insert_citation(NewLedgerEntry {
                job_id: job.id,
                source_hash: "h2".to_owned(),
                citation_number: 1,
                title: "t".to_owned(),
                url: "u".to_owned(),
            })
            .await
            .expect_err("number conflict");
        assert!(matches!(err, StoreError::CitationConflict { .. }));
    }

    #[tokio::test]
    async fn test_reset_running_steps_scoped_to_jobs() {
        let store = MemStore::new();
        let job_a = store.create_job(queued_job("a")).await.expect("create").job;
        let job_b = store.create_job(queued_job("b")).await.expect("create").job;

        let steps_a = store
            .insert_steps(
                job_a.id,
                &[NewStep {
                    title: "s".to_owned(),
                    tool_hint: None,
                    objective: None,
                    theme: None,
                    iteration: 0,
                }],
            )
            .await
            .expect("insert");
        let steps_b = store
            .insert_steps(
                job_b.id,
                &[NewStep {
                    title: "s".to_owned(),
                    tool_hint: None,
                    objective: None,
                    theme: None,
                    iteration: 0,
                }],
            )
            .await
            .expect("insert");

        store
            .set_step_status(steps_a[0].id, StepStatus::Running)
            .await
            .expect("status");
        store
            .set_step_status(steps_b[0].id, StepStatus::Running)
            .await
            .expect("status");

        let reset = store
            .reset_running_steps(&[job_a.id])
            .await
            .expect("reset");
        assert_eq!(reset, 1);

        let a = store.list_steps(job_a.id).await.expect("list");
        let b = store.list_steps(job_b.id).await.expect("list");
        assert_eq!(a[0].status, StepStatus::Pending);
        assert_eq!(b[0].status, StepStatus::Running);
    }

    #[tokio::test]
    async fn test_reactivate_clears_publication_fields() {
        let store = MemStore::new();
        let job = store.create_job(queued_job("q")).await.expect("create").job;
        let assets = ReportAssets {
            markdown: crate::types::AssetRef {
                key: "reports/x/report.md".to_owned(),
                url: "file:///x".to_owned(),
                sha256: "00".to_owned(),
                bytes: 2,
            },
            pdf: None,
            docx: None,
        };
        store
            .complete_job(job.id, "report", &assets)
            .await
            .expect("complete");

        store.reactivate_job(job.id).await.expect("reactivate");
        let job = store.get_job(job.id).await.expect("get");
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.final_report.is_none());
        assert!(job.report_assets.is_none());
        assert!(job.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_section_draft_upsert_replaces() {
        let store = MemStore::new();
        let job = store.create_job(queued_job("q")).await.expect("create").job;

        store
            .upsert_section_draft(
                job.id,
                SectionKey::Analysis,
                DraftStatus::Pending,
                0,
                "",
                &[],
            )
            .await
            .expect("insert");
        store
            .upsert_section_draft(
                job.id,
                SectionKey::Analysis,
                DraftStatus::Completed,
                10,
                "final",
                &[],
            )
            .await
            .expect("upsert");

        let drafts = store.list_section_drafts(job.id).await.expect("list");
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].status, DraftStatus::Completed);
        assert_eq!(drafts[0].content, "final");
    }
}
