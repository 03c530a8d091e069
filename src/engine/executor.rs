//! Pipeline executor: drives one claimed job to a terminal status.
//!
//! Phases: Load → Plan/Resume → Execute(i) → Synthesize → Finalize →
//! Published. The executor re-reads the job row at every phase boundary,
//! between steps, and between section drafts; a control-plane halt unwinds
//! through [`ExecutorError::Halted`] and leaves the row untouched. All
//! progress lives on durable rows, so a rescued job resumes from whatever
//! its predecessor persisted.

use std::sync::Arc;

use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::citations::{CitationSource, LedgerManager};
use super::context::pack_notes;
use super::control;
use super::planner;
use super::report;
use super::summarizer::{self, SummaryOutput};
use super::synthesizer::{self, CriticOutput, SECTION_SPECS};
use super::{ControlSignal, EngineConfig, ExecutorError};
use crate::artifacts::{self, ArtifactStore};
use crate::metrics::Metrics;
use crate::store::Store;
use crate::tokens::estimate_tokens;
use crate::tools::embed::Embedder;
use crate::tools::fetch::FetchChain;
use crate::tools::search::SearchRouter;
use crate::tools::{ChatProvider, FetchedPage, SearchResult};
use crate::types::{
    clamp_importance, CitationMapEntry, DraftStatus, Job, NewNote, NewSource, Note, NoteRole,
    Step, StepStatus,
};
use crate::vector::{NotePayload, VectorIndex, WarmFilter};

/// Results fetched per step.
const FETCHES_PER_STEP: usize = 3;

/// Search hits requested per step query.
const SEARCH_LIMIT: u32 = 8;

/// Importance assigned to step summaries.
const STEP_SUMMARY_IMPORTANCE: u8 = 4;

/// Importance assigned to cross-job summaries.
const CROSS_JOB_IMPORTANCE: u8 = 4;

/// Characters of the report carried into the cross-job summary.
const CROSS_JOB_SUMMARY_CHARS: usize = 700;

/// Shared dependencies for pipeline executors.
///
/// Long-lived, cloneable resources; one [`Executor`] per claimed job is
/// constructed from these.
#[derive(Clone)]
pub struct ExecutorDeps {
    /// Durable store.
    pub store: Arc<dyn Store>,
    /// Search router.
    pub search: Arc<SearchRouter>,
    /// Fetch chain.
    pub fetch: Arc<FetchChain>,
    /// Language-model chat endpoint.
    pub chat: Arc<dyn ChatProvider>,
    /// Embedding wrapper.
    pub embedder: Arc<Embedder>,
    /// Vector index for warm context.
    pub vector: Arc<dyn VectorIndex>,
    /// Artifact store.
    pub artifacts: Arc<dyn ArtifactStore>,
    /// Engine tuning knobs.
    pub config: EngineConfig,
    /// Shared counters.
    pub metrics: Arc<Metrics>,
}

/// Executes one claimed job.
pub struct Executor {
    deps: ExecutorDeps,
    ledger: LedgerManager,
}

impl Executor {
    /// Create an executor from shared dependencies.
    pub fn new(deps: ExecutorDeps) -> Self {
        let ledger = LedgerManager::new(Arc::clone(&deps.store));
        Self { deps, ledger }
    }

    /// Outer frame: drive the job, translating the outcome into status
    /// writes and metrics. Control halts return silently.
    pub async fn run(&self, job_id: Uuid) {
        match self.drive(job_id).await {
            Ok(()) => {
                self.deps.metrics.record_completed();
                info!(job_id = %job_id, "job completed");
            }
            Err(ExecutorError::Halted(signal)) => {
                self.deps.metrics.halts.record(signal);
                info!(job_id = %job_id, halt = signal.label(), "job halted by control signal");
            }
            Err(e) => {
                self.deps.metrics.record_failed();
                error!(job_id = %job_id, error = %e, "job failed");
                if let Err(write_err) = self
                    .deps
                    .store
                    .set_job_error(job_id, &e.to_string())
                    .await
                {
                    error!(job_id = %job_id, error = %write_err, "could not record job error");
                }
            }
        }
    }

    /// The phase loop.
    async fn drive(&self, job_id: Uuid) -> Result<(), ExecutorError> {
        // Load.
        let job = self.checkpoint(job_id).await?;
        if !crate::types::missing_clarification_keys(&job.metadata).is_empty() {
            // The intake contract should have withheld this job; refuse to
            // run it and hand it back to the control plane.
            self.deps
                .store
                .set_job_status(job.id, crate::types::JobStatus::ClarificationRequired)
                .await?;
            return Err(ExecutorError::Halted(ControlSignal::ClarificationRequired));
        }

        // Plan or resume.
        let mut steps = self.deps.store.list_steps(job.id).await?;
        if steps.is_empty() {
            steps = self.plan(&job).await?;
        } else {
            info!(job_id = %job.id, steps = steps.len(), "resuming with existing steps");
        }

        // Execute.
        for step in &steps {
            self.checkpoint(job_id).await?;
            if step.status.is_terminal() {
                continue;
            }
            self.execute_step(&job, step).await?;
        }

        // Iterative expansion.
        self.expand_and_execute(&job).await?;

        // Synthesize.
        self.checkpoint(job_id).await?;
        let (draft, packed) = self.synthesize(&job).await?;

        // Critic.
        let draft = self.run_critic(&job, draft, &packed).await?;

        // Finalize and publish.
        self.checkpoint(job_id).await?;
        self.finalize(&job, &draft).await?;
        Ok(())
    }

    /// The cooperative control check: reload the job and honor any halt
    /// status the control plane has set.
    async fn checkpoint(&self, job_id: Uuid) -> Result<Job, ExecutorError> {
        let job = self.deps.store.get_job(job_id).await?;
        control::check(&job).map_err(ExecutorError::Halted)?;
        Ok(job)
    }

    // ── Plan phase ──

    /// Invoke the planner and persist the resulting steps at iteration 0.
    async fn plan(&self, job: &Job) -> Result<Vec<Step>, ExecutorError> {
        let max_steps = job.options.max_steps.unwrap_or(self.deps.config.max_steps);
        let ctx = self.planner_context(job).await?;

        let messages = planner::compose_messages(&job.question, max_steps, &ctx);
        let new_steps = match self
            .deps
            .chat
            .chat(&messages, planner::chat_options(self.deps.config.max_llm_tokens))
            .await
        {
            Ok(response) => match planner::parse_plan(&response) {
                Ok(planned) if !planned.is_empty() => {
                    planner::to_new_steps(planned, 0, max_steps)
                }
                Ok(_) | Err(_) => {
                    warn!(job_id = %job.id, "planner output unusable, using fallback plan");
                    planner::fallback_plan()
                }
            },
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "planner call failed, using fallback plan");
                planner::fallback_plan()
            }
        };

        let steps = self.deps.store.insert_steps(job.id, &new_steps).await?;
        self.deps.store.heartbeat_job(job.id).await?;
        info!(job_id = %job.id, steps = steps.len(), "plan persisted");
        Ok(steps)
    }

    /// Assemble planner context: this job's summaries plus warm notes from
    /// the vector archive. Vector trouble degrades to an empty warm set.
    async fn planner_context(&self, job: &Job) -> Result<planner::PlannerContext, ExecutorError> {
        let notes = self.deps.store.list_notes(job.id).await?;
        let prior_summaries: Vec<String> = notes
            .iter()
            .filter(|n| matches!(n.role, NoteRole::StepSummary | NoteRole::CrossJobSummary))
            .map(|n| n.content.clone())
            .collect();

        let warm_notes = match self.deps.embedder.embed(&job.question).await {
            Ok(vector) => {
                let filter = WarmFilter {
                    exclude_job: Some(job.id),
                    min_importance: Some(self.deps.config.warm_importance_min),
                };
                match self
                    .deps
                    .vector
                    .search(&vector, self.deps.config.warm_notes_limit, &filter)
                    .await
                {
                    Ok(hits) => hits.into_iter().map(|h| h.payload.content).collect(),
                    Err(e) => {
                        warn!(job_id = %job.id, error = %e, "warm note search failed");
                        Vec::new()
                    }
                }
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "question embedding failed");
                Vec::new()
            }
        };

        Ok(planner::PlannerContext {
            prior_summaries,
            warm_notes,
        })
    }

    // ── Execute phase ──

    /// Run one step: search, fetch, summarize, persist notes and sources.
    async fn execute_step(&self, job: &Job, step: &Step) -> Result<(), ExecutorError> {
        self.deps
            .store
            .set_step_status(step.id, StepStatus::Running)
            .await?;
        self.deps.store.heartbeat_job(job.id).await?;
        info!(job_id = %job.id, step = step.step_order, title = %step.title, "step started");

        let objective = step.objective.as_deref().unwrap_or(&step.title);
        let query = format!("{} :: {}", job.question, objective);
        let results = self
            .deps
            .search
            .search(&query, step.tool_hint.as_deref(), SEARCH_LIMIT)
            .await;

        if results.is_empty() {
            self.deps
                .store
                .set_step_result(
                    step.id,
                    StepStatus::Partial,
                    json!({ "reason": "No search results" }),
                )
                .await?;
            self.deps.store.heartbeat_job(job.id).await?;
            warn!(job_id = %job.id, step = step.step_order, "no search results, step partial");
            return Ok(());
        }

        let fetched = self.fetch_results(job, step, &results).await;
        let summary = self.summarize(job, step, &fetched).await;
        let source_count = self.persist_summary(job, step, &fetched, summary).await?;

        self.deps
            .store
            .set_step_result(step.id, StepStatus::Completed, json!({ "sources": source_count }))
            .await?;
        self.deps.store.heartbeat_job(job.id).await?;
        info!(job_id = %job.id, step = step.step_order, sources = source_count, "step completed");
        Ok(())
    }

    /// Fetch the top results and archive each raw document.
    ///
    /// Fetch and archive failures degrade: the page is skipped or kept
    /// without a raw pointer, and the step continues with what it has.
    async fn fetch_results(
        &self,
        job: &Job,
        step: &Step,
        results: &[SearchResult],
    ) -> Vec<(SearchResult, FetchedPage, String)> {
        let mut fetched = Vec::new();
        for (i, result) in results.iter().take(FETCHES_PER_STEP).enumerate() {
            let page = match self.deps.fetch.fetch(&result.url).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(url = %result.url, error = %e, "fetch failed, skipping result");
                    continue;
                }
            };

            let key = artifacts::raw_document_key(job.id, step.step_order, i);
            let raw = json!({ "url": page.url, "title": page.title, "content": page.content });
            let raw_storage_url = match self
                .deps
                .artifacts
                .put(&key, raw.to_string().as_bytes(), "application/json")
                .await
            {
                Ok(url) => url,
                Err(e) => {
                    warn!(key, error = %e, "raw document archive failed");
                    String::new()
                }
            };

            fetched.push((result.clone(), page, raw_storage_url));
        }
        fetched
    }

    /// Summarize fetched pages, degrading to heuristic notes on any model
    /// or parse failure.
    async fn summarize(
        &self,
        job: &Job,
        step: &Step,
        fetched: &[(SearchResult, FetchedPage, String)],
    ) -> SummaryOutput {
        let pages: Vec<FetchedPage> = fetched.iter().map(|(_, page, _)| page.clone()).collect();
        let messages = summarizer::compose_messages(&job.question, &step.title, &pages);
        match self
            .deps
            .chat
            .chat(&messages, summarizer::chat_options(self.deps.config.max_llm_tokens))
            .await
        {
            Ok(response) => {
                summarizer::parse_summary(&response).unwrap_or_else(|| summarizer::heuristic_summary(&pages))
            }
            Err(e) => {
                warn!(job_id = %job.id, step = step.step_order, error = %e, "summarizer call failed");
                summarizer::heuristic_summary(&pages)
            }
        }
    }

    /// Persist page notes with their sources, index them, and record the
    /// step summary. Returns the number of sources written.
    async fn persist_summary(
        &self,
        job: &Job,
        step: &Step,
        fetched: &[(SearchResult, FetchedPage, String)],
        summary: SummaryOutput,
    ) -> Result<usize, ExecutorError> {
        let mut source_count = 0usize;

        for (i, page_note) in summary.page_notes.iter().enumerate() {
            // Match the note to its fetched document by URL, falling back
            // to position for models that omit the URL.
            let matched = page_note
                .url
                .as_deref()
                .and_then(|url| fetched.iter().find(|(r, p, _)| r.url == url || p.url == url))
                .or_else(|| fetched.get(i));
            let Some((result, page, raw_storage_url)) = matched else {
                continue;
            };

            let note = self
                .deps
                .store
                .insert_note(NewNote {
                    job_id: job.id,
                    step_id: Some(step.id),
                    role: NoteRole::PageSummary,
                    importance: clamp_importance(page_note.importance),
                    token_count: estimate_tokens(&page_note.summary),
                    content: page_note.summary.clone(),
                    source_url: Some(page.url.clone()),
                })
                .await?;
            self.deps
                .store
                .insert_source(NewSource {
                    note_id: note.id,
                    url: page.url.clone(),
                    title: page_note
                        .title
                        .clone()
                        .filter(|t| !t.is_empty())
                        .unwrap_or_else(|| {
                            if page.title.is_empty() {
                                result.title.clone()
                            } else {
                                page.title.clone()
                            }
                        }),
                    snippet: result.snippet.clone(),
                    raw_storage_url: raw_storage_url.clone(),
                })
                .await?;
            source_count = source_count.saturating_add(1);

            self.index_note(&note).await;
            self.deps.store.heartbeat_job(job.id).await?;
        }

        if let Some(step_summary) = summary
            .step_summary
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        {
            self.deps
                .store
                .insert_note(NewNote {
                    job_id: job.id,
                    step_id: Some(step.id),
                    role: NoteRole::StepSummary,
                    importance: STEP_SUMMARY_IMPORTANCE,
                    token_count: estimate_tokens(step_summary),
                    content: step_summary.to_owned(),
                    source_url: None,
                })
                .await?;
            self.deps.store.heartbeat_job(job.id).await?;
        }

        Ok(source_count)
    }

    /// Index a note into the vector archive, best effort.
    async fn index_note(&self, note: &Note) {
        let vector = match self.deps.embedder.embed(&note.content).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(note_id = %note.id, error = %e, "note embedding failed");
                return;
            }
        };
        let payload = NotePayload {
            job_id: note.job_id,
            role: note.role.as_str().to_owned(),
            importance: note.importance,
            content: note.content.clone(),
        };
        if let Err(e) = self.deps.vector.upsert(note.id, &vector, &payload).await {
            warn!(note_id = %note.id, error = %e, "note indexing failed");
        }
    }

    // ── Iterative expansion ──

    /// Ask the planner for follow-up steps and execute them, bounded by the
    /// iteration cap, the step cap, and the iteration token budget.
    async fn expand_and_execute(&self, job: &Job) -> Result<(), ExecutorError> {
        let max_steps = job.options.max_steps.unwrap_or(self.deps.config.max_steps);
        for round in 1..=self.deps.config.max_iterations {
            self.checkpoint(job.id).await?;

            let steps = self.deps.store.list_steps(job.id).await?;
            let existing = u32::try_from(steps.len()).unwrap_or(u32::MAX);
            if existing >= max_steps {
                break;
            }

            let notes = self.deps.store.list_notes(job.id).await?;
            let spent: u64 = notes.iter().map(|n| u64::from(n.token_count)).sum();
            if spent >= u64::from(self.deps.config.iteration_token_budget) {
                info!(job_id = %job.id, spent, "iteration token budget exhausted");
                break;
            }

            let step_summaries: Vec<String> = notes
                .iter()
                .filter(|n| n.role == NoteRole::StepSummary)
                .map(|n| n.content.clone())
                .collect();
            let remaining = max_steps.saturating_sub(existing);
            let messages =
                planner::compose_expansion_messages(&job.question, remaining, &step_summaries);
            let planned = match self
                .deps
                .chat
                .chat(&messages, planner::chat_options(self.deps.config.max_llm_tokens))
                .await
            {
                Ok(response) => planner::parse_plan(&response).unwrap_or_default(),
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "expansion planning failed");
                    Vec::new()
                }
            };
            if planned.is_empty() {
                break;
            }

            let new_steps = planner::to_new_steps(planned, round, remaining);
            let inserted = self.deps.store.insert_steps(job.id, &new_steps).await?;
            self.deps.store.heartbeat_job(job.id).await?;
            info!(job_id = %job.id, round, steps = inserted.len(), "expansion steps planned");

            for step in &inserted {
                self.checkpoint(job.id).await?;
                if step.status.is_terminal() {
                    continue;
                }
                self.execute_step(job, step).await?;
            }
        }
        Ok(())
    }

    // ── Synthesize phase ──

    /// Produce the draft report, in classic or longform mode, plus the
    /// packed notes used for the critic pass.
    async fn synthesize(&self, job: &Job) -> Result<(String, Vec<Note>), ExecutorError> {
        let notes = self.deps.store.list_notes(job.id).await?;
        let packed = pack_notes(
            notes,
            self.deps.config.synthesis_note_budget(),
            self.deps.config.max_notes_for_synth,
        );
        info!(job_id = %job.id, packed = packed.len(), "notes packed for synthesis");

        let draft = if self.deps.config.longform_enabled {
            self.synthesize_longform(job).await?
        } else {
            self.synthesize_classic(job, &packed).await?
        };
        Ok((draft, packed))
    }

    /// Classic mode: one synthesis call over the packed notes.
    async fn synthesize_classic(&self, job: &Job, packed: &[Note]) -> Result<String, ExecutorError> {
        let messages = synthesizer::compose_classic_messages(&job.question, packed);
        let draft = match self
            .deps
            .chat
            .chat(&messages, synthesizer::chat_options(self.deps.config.max_llm_tokens))
            .await
        {
            Ok(response) if !response.trim().is_empty() => response,
            Ok(_) => synthesizer::fallback_draft(&job.question, packed),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "synthesis call failed, using fallback draft");
                synthesizer::fallback_draft(&job.question, packed)
            }
        };
        self.deps.store.heartbeat_job(job.id).await?;
        Ok(draft)
    }

    /// Longform mode: render each configured section from its allow-listed
    /// notes with ledger-assigned citation markers, persisting every section
    /// as a completed draft. A control check runs between sections.
    async fn synthesize_longform(&self, job: &Job) -> Result<String, ExecutorError> {
        let notes = self.deps.store.list_notes(job.id).await?;
        let sources = self.deps.store.list_sources_for_job(job.id).await?;

        let mut sections = Vec::with_capacity(SECTION_SPECS.len());
        for spec in &SECTION_SPECS {
            self.checkpoint(job.id).await?;

            let selected = synthesizer::select_section_notes(&notes, spec);
            let mut body = String::new();
            let mut citation_map = Vec::new();
            for note in &selected {
                let mut numbers = Vec::new();
                for source in sources.iter().filter(|s| s.note_id == note.id) {
                    let number = self
                        .ledger
                        .assign_citation(job.id, &CitationSource::from_source(source))
                        .await?;
                    if !numbers.contains(&number) {
                        numbers.push(number);
                    }
                }
                body.push_str(&synthesizer::render_note_with_citations(&note.content, &numbers));
                body.push_str("\n\n");
                citation_map.push(CitationMapEntry {
                    note_id: note.id,
                    citation_numbers: numbers,
                });
            }

            let body = body.trim_end().to_owned();
            self.deps
                .store
                .upsert_section_draft(
                    job.id,
                    spec.key,
                    DraftStatus::Completed,
                    estimate_tokens(&body),
                    &body,
                    &citation_map,
                )
                .await?;
            self.deps.store.heartbeat_job(job.id).await?;
            sections.push((*spec, body));
        }

        Ok(synthesizer::join_sections(&sections))
    }

    // ── Critic ──

    /// Run the critic over the draft; append limitations and record a
    /// critic note. Any failure leaves the draft unchanged.
    async fn run_critic(
        &self,
        job: &Job,
        draft: String,
        packed: &[Note],
    ) -> Result<String, ExecutorError> {
        let messages = synthesizer::compose_critic_messages(&job.question, &draft, packed);
        let critic: Option<CriticOutput> = match self
            .deps
            .chat
            .chat(&messages, synthesizer::chat_options(self.deps.config.max_llm_tokens))
            .await
        {
            Ok(response) => synthesizer::parse_critic(&response),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "critic call failed, omitting critic block");
                None
            }
        };

        let Some(critic) = critic else {
            return Ok(draft);
        };
        if critic.is_empty() {
            return Ok(draft);
        }

        let content = json!({
            "issues": critic.issues,
            "follow_up": critic.follow_up,
            "limitations": critic.limitations,
        })
        .to_string();
        self.deps
            .store
            .insert_note(NewNote {
                job_id: job.id,
                step_id: None,
                role: NoteRole::CriticNote,
                importance: 3,
                token_count: estimate_tokens(&content),
                content,
                source_url: None,
            })
            .await?;
        self.deps.store.heartbeat_job(job.id).await?;

        Ok(synthesizer::append_limitations(&draft, &critic))
    }

    // ── Finalize phase ──

    /// Linkify citations, append references, publish assets, complete the
    /// job, and archive a cross-job summary for future warm starts.
    async fn finalize(&self, job: &Job, draft: &str) -> Result<(), ExecutorError> {
        let ledger = self.ledger.ledger_or_fallback(job.id).await?;
        let final_report = report::finalize_report(draft, &ledger);

        let assets = artifacts::publish_report(self.deps.artifacts.as_ref(), job.id, &final_report)
            .await
            .map_err(ExecutorError::Artifact)?;
        self.deps
            .store
            .complete_job(job.id, &final_report, &assets)
            .await?;

        let summary: String = final_report.chars().take(CROSS_JOB_SUMMARY_CHARS).collect();
        let content = json!({ "question": job.question, "summary": summary }).to_string();
        let note = self
            .deps
            .store
            .insert_note(NewNote {
                job_id: job.id,
                step_id: None,
                role: NoteRole::CrossJobSummary,
                importance: CROSS_JOB_IMPORTANCE,
                token_count: estimate_tokens(&content),
                content,
                source_url: None,
            })
            .await?;
        self.index_note(&note).await;

        info!(job_id = %job.id, citations = ledger.len(), "report published");
        Ok(())
    }
}
