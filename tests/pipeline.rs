//! End-to-end pipeline scenarios against the in-memory store and scripted
//! tool gateway mocks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use fathom::artifacts::LocalArtifactStore;
use fathom::engine::executor::{Executor, ExecutorDeps};
use fathom::engine::planner::FALLBACK_STEP_TITLE;
use fathom::engine::rescue::RescueSweeper;
use fathom::engine::EngineConfig;
use fathom::metrics::Metrics;
use fathom::store::mem::MemStore;
use fathom::store::Store;
use fathom::tools::embed::Embedder;
use fathom::tools::fetch::FetchChain;
use fathom::tools::search::SearchRouter;
use fathom::tools::{
    ChatMessage, ChatOptions, ChatProvider, EmbedProvider, FetchProvider, FetchedPage,
    SearchProvider, SearchResult, ToolError,
};
use fathom::types::{
    JobStatus, Metadata, NewJob, NoteRole, StepStatus, CLARIFICATION_KEYS,
};
use fathom::vector::NullVectorIndex;

// ── Scripted tool gateway ───────────────────────────────────────

/// Search backend returning the same fixed hits for every query.
struct FixedSearch {
    urls: Vec<String>,
}

#[async_trait]
impl SearchProvider for FixedSearch {
    async fn search(&self, _query: &str, _limit: u32) -> Result<Vec<SearchResult>, ToolError> {
        Ok(self
            .urls
            .iter()
            .map(|url| SearchResult {
                title: format!("Result for {url}"),
                url: url.clone(),
                snippet: "snippet".to_owned(),
            })
            .collect())
    }

    fn name(&self) -> &str {
        "searxng"
    }
}

/// Search backend that never finds anything.
struct EmptySearch;

#[async_trait]
impl SearchProvider for EmptySearch {
    async fn search(&self, _query: &str, _limit: u32) -> Result<Vec<SearchResult>, ToolError> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "searxng"
    }
}

/// Fetch backend synthesizing a page for any URL.
struct SyntheticFetch;

#[async_trait]
impl FetchProvider for SyntheticFetch {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, ToolError> {
        Ok(FetchedPage {
            url: url.to_owned(),
            title: format!("Page at {url}"),
            content: format!("Reference content hosted at {url} with enough words to summarize."),
        })
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

struct TinyEmbed;

#[async_trait]
impl EmbedProvider for TinyEmbed {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ToolError> {
        Ok(vec![0.5; 4])
    }

    fn dimensions(&self) -> usize {
        4
    }
}

/// Routes chat calls by role prompt and answers deterministically, so a
/// resumed executor sees the same model behavior as the first attempt.
struct RoutingChat {
    /// Steps the planner proposes.
    plan_steps: usize,
    /// Planner returns prose instead of JSON.
    garble_plan: bool,
    /// Critic limitations text; empty omits the critic block.
    limitations: String,
    /// Summarize calls observed.
    summarize_calls: AtomicUsize,
    /// Flip the job to this status right after the Nth summarize call.
    interrupt_after_summarize: Option<(usize, JobStatus, Arc<MemStore>, uuid::Uuid)>,
}

impl RoutingChat {
    fn new(plan_steps: usize) -> Self {
        Self {
            plan_steps,
            garble_plan: false,
            limitations: String::new(),
            summarize_calls: AtomicUsize::new(0),
            interrupt_after_summarize: None,
        }
    }

    fn plan_response(&self) -> String {
        let steps: Vec<String> = (1..=self.plan_steps)
            .map(|i| {
                format!(
                    "{{\"title\":\"Angle {i}\",\"tool_hint\":\"searxng\",\
                     \"objective\":\"Investigate angle {i}\"}}"
                )
            })
            .collect();
        format!("{{\"steps\":[{}]}}", steps.join(","))
    }

    /// Build a summarizer response covering every URL in the prompt.
    fn summary_response(prompt: &str) -> String {
        let urls: Vec<&str> = prompt
            .lines()
            .filter_map(|line| line.strip_prefix("URL: "))
            .collect();
        let notes: Vec<String> = urls
            .iter()
            .map(|url| {
                format!(
                    "{{\"url\":\"{url}\",\"title\":\"Page at {url}\",\
                     \"summary\":\"Key finding extracted from {url}\",\"importance\":4}}"
                )
            })
            .collect();
        format!(
            "{{\"page_notes\":[{}],\"step_summary\":\"What this step established\"}}",
            notes.join(",")
        )
    }
}

#[async_trait]
impl ChatProvider for RoutingChat {
    async fn chat(&self, messages: &[ChatMessage], _opts: ChatOptions) -> Result<String, ToolError> {
        let system = messages.first().map(|m| m.content.as_str()).unwrap_or("");
        let user = messages.get(1).map(|m| m.content.as_str()).unwrap_or("");

        if system.contains("research planner") {
            if self.garble_plan {
                return Ok("I cannot produce a plan in this format, sorry.".to_owned());
            }
            return Ok(self.plan_response());
        }
        if system.contains("research summarizer") {
            let call = self.summarize_calls.fetch_add(1, Ordering::SeqCst).saturating_add(1);
            let response = Self::summary_response(user);
            if let Some((after, status, store, job_id)) = &self.interrupt_after_summarize {
                if call == *after {
                    store
                        .set_job_status(*job_id, *status)
                        .await
                        .expect("interrupt status write");
                }
            }
            return Ok(response);
        }
        if system.contains("research critic") {
            return Ok(format!(
                "{{\"issues\":[],\"follow_up\":[],\"limitations\":\"{}\"}}",
                self.limitations
            ));
        }
        // Classic synthesis.
        Ok("Synthesized findings with citation [1].".to_owned())
    }
}

// ── Harness ─────────────────────────────────────────────────────

fn clarified_metadata() -> Metadata {
    let mut meta = Metadata::new();
    meta.insert("time_horizon".to_owned(), "12-18 months".to_owned());
    meta.insert("region_focus".to_owned(), "EU".to_owned());
    meta.insert("data_modalities".to_owned(), "blogs, PDFs".to_owned());
    meta.insert("integration_targets".to_owned(), "SharePoint".to_owned());
    meta.insert("quality_constraints".to_owned(), "neutral tone".to_owned());
    meta
}

struct Harness {
    store: Arc<MemStore>,
    metrics: Arc<Metrics>,
    deps: ExecutorDeps,
    _artifact_dir: tempfile::TempDir,
}

fn harness(chat: Arc<dyn ChatProvider>, urls: &[&str], longform: bool) -> Harness {
    harness_with(chat, urls, longform, false)
}

fn harness_with(
    chat: Arc<dyn ChatProvider>,
    urls: &[&str],
    longform: bool,
    empty_search: bool,
) -> Harness {
    let store = Arc::new(MemStore::new());
    let metrics = Arc::new(Metrics::default());
    let artifact_dir = tempfile::tempdir().expect("tempdir");

    let search_provider: Arc<dyn SearchProvider> = if empty_search {
        Arc::new(EmptySearch)
    } else {
        Arc::new(FixedSearch {
            urls: urls.iter().map(|u| (*u).to_owned()).collect(),
        })
    };

    let deps = ExecutorDeps {
        store: Arc::clone(&store) as Arc<dyn Store>,
        search: Arc::new(SearchRouter::new(
            vec![search_provider],
            Arc::clone(&metrics),
        )),
        fetch: Arc::new(FetchChain::new(
            None,
            Arc::new(SyntheticFetch),
            Arc::clone(&metrics),
        )),
        chat,
        embedder: Arc::new(Embedder::new(Arc::new(TinyEmbed), Arc::clone(&metrics))),
        vector: Arc::new(NullVectorIndex),
        artifacts: Arc::new(LocalArtifactStore::new(artifact_dir.path())),
        config: EngineConfig {
            longform_enabled: longform,
            max_iterations: 0,
            ..Default::default()
        },
        metrics: Arc::clone(&metrics),
    };

    Harness {
        store,
        metrics,
        deps,
        _artifact_dir: artifact_dir,
    }
}

async fn enqueue_and_claim(store: &MemStore) -> fathom::types::Job {
    store
        .create_job(NewJob {
            question: "impact of EU AI Act on model providers".to_owned(),
            options: Default::default(),
            metadata: clarified_metadata(),
        })
        .await
        .expect("create");
    store
        .claim_next_job()
        .await
        .expect("claim")
        .expect("job queued")
}

// ── Scenarios ───────────────────────────────────────────────────

/// S1: clarify-then-run. Withheld at intake, admitted after metadata
/// resupply, completed with a report and ledger entries.
#[tokio::test]
async fn test_clarify_then_run_to_completion() {
    let chat = Arc::new(RoutingChat::new(2));
    let h = harness(chat, &["https://one.example", "https://two.example"], true);

    let outcome = h
        .store
        .create_job(NewJob {
            question: "impact of EU AI Act on model providers".to_owned(),
            options: Default::default(),
            metadata: Metadata::new(),
        })
        .await
        .expect("create");
    assert_eq!(outcome.job.status, JobStatus::ClarificationRequired);
    assert_eq!(outcome.clarification_prompts.len(), 5);
    for key in CLARIFICATION_KEYS {
        assert!(
            outcome.clarification_prompts.iter().any(|p| p.contains(key)),
            "prompt list must cover {key}"
        );
    }

    let job = h
        .store
        .resupply_metadata(outcome.job.id, &clarified_metadata())
        .await
        .expect("clarify");
    assert_eq!(job.status, JobStatus::Queued);

    let claimed = h.store.claim_next_job().await.expect("claim").expect("queued");
    Executor::new(h.deps.clone()).run(claimed.id).await;

    let job = h.store.get_job(claimed.id).await.expect("get");
    assert_eq!(job.status, JobStatus::Completed);
    let report = job.final_report.expect("final report");
    assert!(!report.is_empty());
    assert!(report.contains("## References"));
    assert!(job.report_assets.is_some());
    assert!(job.completed_at.is_some());

    let ledger = h.store.list_citations(claimed.id).await.expect("ledger");
    assert!(!ledger.is_empty(), "longform run must persist ledger entries");
}

/// S2: stall rescue round-trip, then a second executor finishes the job
/// without duplicating its steps.
#[tokio::test]
async fn test_stall_rescue_then_clean_resume() {
    let chat = Arc::new(RoutingChat::new(2));
    let h = harness(chat, &["https://one.example"], false);
    let job = enqueue_and_claim(&h.store).await;

    // Persist the plan, mark step 1 running, then simulate worker death by
    // backdating every liveness timestamp past the heartbeat threshold.
    let steps = h
        .store
        .insert_steps(
            job.id,
            &[
                fathom::types::NewStep {
                    title: "Angle 1".to_owned(),
                    tool_hint: Some("searxng".to_owned()),
                    objective: Some("Investigate angle 1".to_owned()),
                    theme: None,
                    iteration: 0,
                },
                fathom::types::NewStep {
                    title: "Angle 2".to_owned(),
                    tool_hint: Some("searxng".to_owned()),
                    objective: Some("Investigate angle 2".to_owned()),
                    theme: None,
                    iteration: 0,
                },
            ],
        )
        .await
        .expect("steps");
    h.store
        .set_step_status(steps[0].id, StepStatus::Running)
        .await
        .expect("running");
    h.store
        .backdate_heartbeat(job.id, Utc::now() - Duration::seconds(600));

    let sweeper = RescueSweeper::new(
        Arc::clone(&h.store) as Arc<dyn Store>,
        h.deps.config.clone(),
        Arc::clone(&h.metrics),
    );
    let report = sweeper.sweep(Utc::now()).await.expect("sweep");
    assert_eq!(report.heartbeat, vec![job.id]);

    let rescued = h.store.get_job(job.id).await.expect("get");
    assert_eq!(rescued.status, JobStatus::Queued);
    let steps = h.store.list_steps(job.id).await.expect("steps");
    assert!(steps.iter().all(|s| s.status == StepStatus::Pending));

    // A fresh claim and executor finish the job without duplicating steps.
    let reclaimed = h.store.claim_next_job().await.expect("claim").expect("queued");
    assert_eq!(reclaimed.id, job.id);
    Executor::new(h.deps.clone()).run(job.id).await;

    let done = h.store.get_job(job.id).await.expect("get");
    assert_eq!(done.status, JobStatus::Completed);
    let steps = h.store.list_steps(job.id).await.expect("steps");
    assert_eq!(steps.len(), 2, "resume must not re-plan existing steps");
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
}

/// S3: cancelling mid-step halts silently at the next boundary; no notes
/// for later steps, no error recorded.
#[tokio::test]
async fn test_cancel_mid_step_halts_silently() {
    let store_for_chat = Arc::new(MemStore::new());
    // The chat mock needs the store and the job id before the harness owns
    // them, so wire the harness around the same store.
    let job_outcome = store_for_chat
        .create_job(NewJob {
            question: "q".to_owned(),
            options: Default::default(),
            metadata: clarified_metadata(),
        })
        .await
        .expect("create");
    let job_id = job_outcome.job.id;

    let mut chat = RoutingChat::new(3);
    chat.interrupt_after_summarize = Some((
        2,
        JobStatus::Cancelled,
        Arc::clone(&store_for_chat),
        job_id,
    ));
    let chat = Arc::new(chat);

    let metrics = Arc::new(Metrics::default());
    let artifact_dir = tempfile::tempdir().expect("tempdir");
    let deps = ExecutorDeps {
        store: Arc::clone(&store_for_chat) as Arc<dyn Store>,
        search: Arc::new(SearchRouter::new(
            vec![Arc::new(FixedSearch {
                urls: vec!["https://one.example".to_owned()],
            })],
            Arc::clone(&metrics),
        )),
        fetch: Arc::new(FetchChain::new(
            None,
            Arc::new(SyntheticFetch),
            Arc::clone(&metrics),
        )),
        chat,
        embedder: Arc::new(Embedder::new(Arc::new(TinyEmbed), Arc::clone(&metrics))),
        vector: Arc::new(NullVectorIndex),
        artifacts: Arc::new(LocalArtifactStore::new(artifact_dir.path())),
        config: EngineConfig {
            max_iterations: 0,
            ..Default::default()
        },
        metrics: Arc::clone(&metrics),
    };

    let claimed = store_for_chat
        .claim_next_job()
        .await
        .expect("claim")
        .expect("queued");
    assert_eq!(claimed.id, job_id);
    Executor::new(deps).run(job_id).await;

    let job = store_for_chat.get_job(job_id).await.expect("get");
    assert_eq!(job.status, JobStatus::Cancelled, "status must not be overwritten");
    assert!(job.error.is_none(), "a halt is not an error");
    assert!(job.final_report.is_none());

    // Steps 1 and 2 ran; step 3 never started and produced no notes.
    let steps = store_for_chat.list_steps(job_id).await.expect("steps");
    assert_eq!(steps.len(), 3);
    assert_eq!(steps[2].status, StepStatus::Pending);
    let notes = store_for_chat.list_notes(job_id).await.expect("notes");
    assert!(notes.iter().all(|n| n.step_id != Some(steps[2].id)));

    assert_eq!(
        metrics
            .halts
            .count(fathom::engine::ControlSignal::Cancelled),
        1
    );
}

/// S4: the same source reached from two steps yields one ledger entry and
/// one citation number in the report.
#[tokio::test]
async fn test_ledger_deduplicates_repeated_source() {
    let chat = Arc::new(RoutingChat::new(2));
    let h = harness(chat, &["https://shared.example"], true);
    let job = enqueue_and_claim(&h.store).await;

    Executor::new(h.deps.clone()).run(job.id).await;

    let done = h.store.get_job(job.id).await.expect("get");
    assert_eq!(done.status, JobStatus::Completed);

    let ledger = h.store.list_citations(job.id).await.expect("ledger");
    assert_eq!(ledger.len(), 1, "one entry for the shared source");
    assert_eq!(ledger[0].citation_number, 1);

    let report = done.final_report.expect("report");
    assert!(report.contains("[1](#ref-1)"));
    assert!(!report.contains("[2](#ref-2)"));

    // Both steps produced notes over the same source.
    let sources = h.store.list_sources_for_job(job.id).await.expect("sources");
    assert!(sources.len() >= 2);
}

/// S5 lives with the context packer's unit tests; S6: a garbled planner
/// response produces exactly the fallback step and the job still completes.
#[tokio::test]
async fn test_fallback_plan_on_garbled_planner() {
    let mut chat = RoutingChat::new(0);
    chat.garble_plan = true;
    let h = harness(Arc::new(chat), &["https://one.example"], false);
    let job = enqueue_and_claim(&h.store).await;

    Executor::new(h.deps.clone()).run(job.id).await;

    let steps = h.store.list_steps(job.id).await.expect("steps");
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].title, FALLBACK_STEP_TITLE);
    assert_eq!(steps[0].tool_hint.as_deref(), Some("searxng"));
    assert_eq!(steps[0].iteration, 0);

    let job = h.store.get_job(job.id).await.expect("get");
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.final_report.is_some());
}

/// A search that finds nothing turns the step partial, and the job still
/// publishes a report that reflects the gap.
#[tokio::test]
async fn test_empty_search_marks_step_partial() {
    let mut chat = RoutingChat::new(1);
    chat.limitations = "No sources could be retrieved.".to_owned();
    let h = harness_with(Arc::new(chat), &[], false, true);
    let job = enqueue_and_claim(&h.store).await;

    Executor::new(h.deps.clone()).run(job.id).await;

    let steps = h.store.list_steps(job.id).await.expect("steps");
    assert_eq!(steps[0].status, StepStatus::Partial);
    let result = steps[0].result.clone().expect("result");
    assert_eq!(result["reason"], "No search results");

    let job = h.store.get_job(job.id).await.expect("get");
    assert_eq!(job.status, JobStatus::Completed);
    let report = job.final_report.expect("report");
    assert!(report.contains("Limitations & Critic Notes"));

    // The critic feedback is also recorded as a note.
    let notes = h.store.list_notes(job.id).await.expect("notes");
    assert!(notes.iter().any(|n| n.role == NoteRole::CriticNote));
}

/// Idempotent resume: an interrupted run plus a resumed run produce the
/// same durable sets as one uninterrupted run.
#[tokio::test]
async fn test_resume_produces_identical_sets() {
    // Baseline: uninterrupted job.
    let chat = Arc::new(RoutingChat::new(2));
    let baseline = harness(
        chat,
        &["https://one.example", "https://two.example"],
        true,
    );
    let job_a = enqueue_and_claim(&baseline.store).await;
    Executor::new(baseline.deps.clone()).run(job_a.id).await;
    let notes_a = baseline.store.list_notes(job_a.id).await.expect("notes");
    let sources_a = baseline
        .store
        .list_sources_for_job(job_a.id)
        .await
        .expect("sources");
    let ledger_a = baseline.store.list_citations(job_a.id).await.expect("ledger");

    // Interrupted job on its own store: paused after step 1's summarize,
    // then requeued and finished by a second executor.
    let store = Arc::new(MemStore::new());
    store
        .create_job(NewJob {
            question: "impact of EU AI Act on model providers".to_owned(),
            options: Default::default(),
            metadata: clarified_metadata(),
        })
        .await
        .expect("create");
    let job_b = store.claim_next_job().await.expect("claim").expect("queued");

    let mut chat = RoutingChat::new(2);
    chat.interrupt_after_summarize =
        Some((1, JobStatus::Paused, Arc::clone(&store), job_b.id));
    let metrics = Arc::new(Metrics::default());
    let artifact_dir = tempfile::tempdir().expect("tempdir");
    let mut deps = ExecutorDeps {
        store: Arc::clone(&store) as Arc<dyn Store>,
        search: Arc::new(SearchRouter::new(
            vec![Arc::new(FixedSearch {
                urls: vec![
                    "https://one.example".to_owned(),
                    "https://two.example".to_owned(),
                ],
            })],
            Arc::clone(&metrics),
        )),
        fetch: Arc::new(FetchChain::new(
            None,
            Arc::new(SyntheticFetch),
            Arc::clone(&metrics),
        )),
        chat: Arc::new(chat),
        embedder: Arc::new(Embedder::new(Arc::new(TinyEmbed), Arc::clone(&metrics))),
        vector: Arc::new(NullVectorIndex),
        artifacts: Arc::new(LocalArtifactStore::new(artifact_dir.path())),
        config: EngineConfig {
            longform_enabled: true,
            max_iterations: 0,
            ..Default::default()
        },
        metrics: Arc::clone(&metrics),
    };

    Executor::new(deps.clone()).run(job_b.id).await;
    let paused = store.get_job(job_b.id).await.expect("get");
    assert_eq!(paused.status, JobStatus::Paused);
    let steps = store.list_steps(job_b.id).await.expect("steps");
    assert_eq!(steps[0].status, StepStatus::Completed);
    assert_eq!(steps[1].status, StepStatus::Pending);

    // Control plane requeues; a new executor resumes from durable state.
    store.reactivate_job(job_b.id).await.expect("reactivate");
    let reclaimed = store.claim_next_job().await.expect("claim").expect("queued");
    assert_eq!(reclaimed.id, job_b.id);
    // The fresh executor uses an identical chat without the interrupt hook.
    deps.chat = Arc::new(RoutingChat::new(2));
    Executor::new(deps).run(job_b.id).await;

    let done = store.get_job(job_b.id).await.expect("get");
    assert_eq!(done.status, JobStatus::Completed);

    let notes_b = store.list_notes(job_b.id).await.expect("notes");
    let sources_b = store.list_sources_for_job(job_b.id).await.expect("sources");
    let ledger_b = store.list_citations(job_b.id).await.expect("ledger");

    // Same durable sets as the uninterrupted run.
    assert_eq!(count_roles(&notes_a), count_roles(&notes_b));
    assert_eq!(sources_a.len(), sources_b.len());
    let urls_a = sorted_urls(&ledger_a);
    let urls_b = sorted_urls(&ledger_b);
    assert_eq!(urls_a, urls_b);
    assert_eq!(ledger_a.len(), ledger_b.len());
}

/// The executor refuses a job whose clarification metadata went missing,
/// handing it back to the control plane instead of running it.
#[tokio::test]
async fn test_executor_refuses_unclarified_job() {
    let chat = Arc::new(RoutingChat::new(1));
    let h = harness(chat, &["https://one.example"], false);

    let outcome = h
        .store
        .create_job(NewJob {
            question: "q".to_owned(),
            options: Default::default(),
            metadata: Metadata::new(),
        })
        .await
        .expect("create");
    // Force the illegal state: running without clarification metadata.
    h.store
        .set_job_status(outcome.job.id, JobStatus::Running)
        .await
        .expect("force running");

    Executor::new(h.deps.clone()).run(outcome.job.id).await;

    let job = h.store.get_job(outcome.job.id).await.expect("get");
    assert_eq!(job.status, JobStatus::ClarificationRequired);
    assert!(job.error.is_none());
    assert!(h.store.list_steps(job.id).await.expect("steps").is_empty());
}

fn count_roles(notes: &[fathom::types::Note]) -> std::collections::BTreeMap<&'static str, usize> {
    let mut counts = std::collections::BTreeMap::new();
    for note in notes {
        let entry = counts.entry(note.role.as_str()).or_insert(0usize);
        *entry = entry.saturating_add(1);
    }
    counts
}

fn sorted_urls(ledger: &[fathom::types::LedgerEntry]) -> Vec<String> {
    let mut urls: Vec<String> = ledger.iter().map(|e| e.url.clone()).collect();
    urls.sort();
    urls
}
