//! Fathom worker and control CLI.
//!
//! `start` runs the sweep-and-claim worker loop; the other subcommands are a
//! thin control surface over the durable store for operators: enqueue a job,
//! resupply clarification metadata, inspect status, and pause/resume/cancel.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use fathom::artifacts::{ArtifactStore, HttpArtifactStore, LocalArtifactStore};
use fathom::config::Config;
use fathom::engine::executor::ExecutorDeps;
use fathom::engine::worker::Worker;
use fathom::logging;
use fathom::metrics::Metrics;
use fathom::store::postgres::PgStore;
use fathom::store::Store;
use fathom::tools::chat::HttpChat;
use fathom::tools::embed::{Embedder, HttpEmbed};
use fathom::tools::fetch::{DirectFetch, FetchChain, WorkflowFetch};
use fathom::tools::search::{SearchRouter, SearxngSearch, WorkflowSearch};
use fathom::tools::{FetchProvider, SearchProvider};
use fathom::types::{JobOptions, JobStatus, Metadata, NewJob};
use fathom::vector::{HttpVectorIndex, NullVectorIndex, VectorIndex};

#[derive(Parser)]
#[command(name = "fathom", about = "Durable deep-research job orchestrator")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "fathom.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker loop: rescue sweeps, queue claims, pipeline execution.
    Start,

    /// Create a research job.
    Enqueue {
        /// The research question.
        #[arg(long)]
        question: String,
        /// Research depth hint.
        #[arg(long)]
        depth: Option<String>,
        /// Cap on planned steps.
        #[arg(long)]
        max_steps: Option<u32>,
        /// Per-job duration budget in seconds.
        #[arg(long)]
        max_duration_seconds: Option<u64>,
        /// Metadata pairs, `key=value`, repeatable.
        #[arg(long = "meta")]
        meta: Vec<String>,
    },

    /// Resupply clarification metadata for a held job.
    Clarify {
        /// Job id.
        job_id: Uuid,
        /// Metadata pairs, `key=value`, repeatable.
        #[arg(long = "meta")]
        meta: Vec<String>,
    },

    /// Show a job's status, steps, and published assets.
    Status {
        /// Job id.
        job_id: Uuid,
    },

    /// Pause a job at its next control checkpoint.
    Pause {
        /// Job id.
        job_id: Uuid,
    },

    /// Requeue a paused job, clearing any previous publication.
    Resume {
        /// Job id.
        job_id: Uuid,
    },

    /// Cancel a job at its next control checkpoint.
    Cancel {
        /// Job id.
        job_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    let _logging = match &cli.command {
        Command::Start => logging::init_worker(std::path::Path::new(&config.logs_dir))?,
        _ => logging::init_cli(),
    };

    let store: Arc<dyn Store> = Arc::new(
        PgStore::connect(&config.database.url, config.database.max_connections)
            .await
            .context("failed to connect to the durable store")?,
    );

    match cli.command {
        Command::Start => run_worker(config, store).await,
        Command::Enqueue {
            question,
            depth,
            max_steps,
            max_duration_seconds,
            meta,
        } => {
            let metadata: Metadata = Config::parse_meta_pairs(&meta)?;
            let outcome = store
                .create_job(NewJob {
                    question,
                    options: JobOptions {
                        depth,
                        max_steps,
                        max_duration_seconds,
                        tags: Vec::new(),
                    },
                    metadata,
                })
                .await?;
            println!("job {} {}", outcome.job.id, outcome.job.status.as_str());
            for prompt in &outcome.clarification_prompts {
                println!("  clarify: {prompt}");
            }
            Ok(())
        }
        Command::Clarify { job_id, meta } => {
            let metadata: Metadata = Config::parse_meta_pairs(&meta)?;
            let job = store.resupply_metadata(job_id, &metadata).await?;
            println!("job {} {}", job.id, job.status.as_str());
            Ok(())
        }
        Command::Status { job_id } => {
            let job = store.get_job(job_id).await?;
            println!("job      {}", job.id);
            println!("status   {}", job.status.as_str());
            println!("question {}", job.question);
            if let Some(error) = &job.error {
                println!("error    {error}");
            }
            let steps = store.list_steps(job_id).await?;
            for step in &steps {
                println!(
                    "  step {:>2} [{}] {}",
                    step.step_order,
                    step.status.as_str(),
                    step.title
                );
            }
            if let Some(assets) = &job.report_assets {
                println!("  asset {} ({} bytes)", assets.markdown.key, assets.markdown.bytes);
            }
            Ok(())
        }
        Command::Pause { job_id } => set_status(&store, job_id, JobStatus::Paused).await,
        Command::Resume { job_id } => {
            store.reactivate_job(job_id).await?;
            println!("job {job_id} queued");
            Ok(())
        }
        Command::Cancel { job_id } => set_status(&store, job_id, JobStatus::Cancelled).await,
    }
}

async fn set_status(store: &Arc<dyn Store>, job_id: Uuid, status: JobStatus) -> Result<()> {
    store.set_job_status(job_id, status).await?;
    println!("job {job_id} {}", status.as_str());
    Ok(())
}

/// Wire the tool gateway and collaborators from config and run the worker.
async fn run_worker(config: Config, store: Arc<dyn Store>) -> Result<()> {
    let metrics = Arc::new(Metrics::default());

    let mut search_providers: Vec<Arc<dyn SearchProvider>> =
        vec![Arc::new(SearxngSearch::new(&config.tools.searxng_url))];
    if !config.tools.search_workflow_url.is_empty() {
        search_providers.push(Arc::new(WorkflowSearch::new(&config.tools.search_workflow_url)));
    }
    let search = Arc::new(SearchRouter::new(search_providers, Arc::clone(&metrics)));

    let workflow_fetch: Option<Arc<dyn FetchProvider>> = if config.tools.fetch_workflow_url.is_empty()
    {
        None
    } else {
        Some(Arc::new(WorkflowFetch::new(&config.tools.fetch_workflow_url)))
    };
    let fetch = Arc::new(FetchChain::new(
        workflow_fetch,
        Arc::new(DirectFetch::new()),
        Arc::clone(&metrics),
    ));

    let chat = Arc::new(HttpChat::new(
        &config.tools.chat_url,
        &config.tools.chat_model,
        config.chat_api_key(),
        Arc::clone(&metrics),
    ));

    let embed_provider = Arc::new(HttpEmbed::new(
        &config.tools.embed_url,
        &config.tools.embed_model,
        config.tools.embed_dims,
    ));
    let embedder = Arc::new(Embedder::new(embed_provider, Arc::clone(&metrics)));

    let vector: Arc<dyn VectorIndex> = if config.vector.base_url.is_empty() {
        Arc::new(NullVectorIndex)
    } else {
        let index = HttpVectorIndex::new(&config.vector.base_url, &config.vector.collection);
        if let Err(e) = index.ensure_collection(config.tools.embed_dims).await {
            tracing::warn!(error = %e, "vector collection setup failed, warm context degraded");
        }
        Arc::new(index)
    };

    let artifacts: Arc<dyn ArtifactStore> = if config.artifacts.mode == "http" {
        Arc::new(HttpArtifactStore::new(&config.artifacts.base_url))
    } else {
        Arc::new(LocalArtifactStore::new(config.artifacts.root_dir.clone()))
    };

    let deps = ExecutorDeps {
        store,
        search,
        fetch,
        chat,
        embedder,
        vector,
        artifacts,
        config: config.engine_config(),
        metrics,
    };

    Worker::new(deps).run().await;
    Ok(())
}
