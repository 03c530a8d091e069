//! Configuration loading and validation.
//!
//! A single TOML file (`fathom.toml`) with env overlays: `DATABASE_URL`
//! overrides the database section, and secrets (the chat API key) are only
//! ever read from the environment. Every field has a serde default so a
//! minimal file — or none — still yields a runnable configuration.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::engine::EngineConfig;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Database connection settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Engine tuning knobs.
    #[serde(default)]
    pub engine: EngineSection,

    /// Rescue sweeper thresholds.
    #[serde(default)]
    pub rescue: RescueConfig,

    /// Feature flags.
    #[serde(default)]
    pub features: FeaturesConfig,

    /// Planner expansion limits.
    #[serde(default)]
    pub iteration: IterationConfig,

    /// External tool endpoints.
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Artifact store settings.
    #[serde(default)]
    pub artifacts: ArtifactsConfig,

    /// Vector store settings.
    #[serde(default)]
    pub vector: VectorConfig,

    /// Directory for rotated JSON logs.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: String,
}

/// Database connection settings.
#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection URL. Overridden by `DATABASE_URL`.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_pool_size(),
        }
    }
}

/// Engine tuning knobs as they appear in the file.
#[derive(Debug, Deserialize)]
pub struct EngineSection {
    /// Worker slots.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Planner cap on steps.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Default per-job budget in seconds.
    #[serde(default = "default_max_job_seconds")]
    pub max_job_seconds: u64,
    /// Max tokens per language-model response.
    #[serde(default = "default_max_llm_tokens")]
    pub max_llm_tokens: u32,
    /// Language-model context window.
    #[serde(default = "default_max_context")]
    pub max_context: u32,
    /// Cap on notes packed per synthesis call.
    #[serde(default = "default_max_notes_for_synth")]
    pub max_notes_for_synth: usize,
    /// Cap on warm archive notes fed to the planner.
    #[serde(default = "default_warm_notes_limit")]
    pub warm_notes_limit: u32,
    /// Minimum importance for warm notes.
    #[serde(default = "default_warm_importance_min")]
    pub warm_importance_min: u8,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_steps: default_max_steps(),
            max_job_seconds: default_max_job_seconds(),
            max_llm_tokens: default_max_llm_tokens(),
            max_context: default_max_context(),
            max_notes_for_synth: default_max_notes_for_synth(),
            warm_notes_limit: default_warm_notes_limit(),
            warm_importance_min: default_warm_importance_min(),
        }
    }
}

/// Rescue sweeper thresholds, in seconds.
#[derive(Debug, Deserialize)]
pub struct RescueConfig {
    /// Threshold for jobs that never produced steps.
    #[serde(default = "default_rescue_start")]
    pub start_seconds: u64,
    /// Threshold on a stale heartbeat.
    #[serde(default = "default_rescue_heartbeat")]
    pub heartbeat_seconds: u64,
    /// Grace added to a job's duration budget.
    #[serde(default = "default_rescue_grace")]
    pub grace_seconds: u64,
}

impl Default for RescueConfig {
    fn default() -> Self {
        Self {
            start_seconds: default_rescue_start(),
            heartbeat_seconds: default_rescue_heartbeat(),
            grace_seconds: default_rescue_grace(),
        }
    }
}

/// Feature flags.
#[derive(Debug, Default, Deserialize)]
pub struct FeaturesConfig {
    /// Whether synthesis runs the longform section-draft path.
    #[serde(default)]
    pub longform_enabled: bool,
}

/// Planner expansion limits.
#[derive(Debug, Deserialize)]
pub struct IterationConfig {
    /// Maximum expansion rounds after the original plan.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Approximate token budget across expansion rounds.
    #[serde(default = "default_iteration_token_budget")]
    pub token_budget: u32,
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            token_budget: default_iteration_token_budget(),
        }
    }
}

/// External tool endpoints.
#[derive(Debug, Deserialize)]
pub struct ToolsConfig {
    /// SearXNG base URL.
    #[serde(default = "default_searxng_url")]
    pub searxng_url: String,
    /// Workflow search endpoint; empty disables it.
    #[serde(default)]
    pub search_workflow_url: String,
    /// Workflow fetch endpoint; empty disables it.
    #[serde(default)]
    pub fetch_workflow_url: String,
    /// Chat completion base URL.
    #[serde(default = "default_chat_url")]
    pub chat_url: String,
    /// Chat model identifier.
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    /// Environment variable holding the chat API key.
    #[serde(default = "default_chat_key_env")]
    pub chat_api_key_env: String,
    /// Embedding endpoint.
    #[serde(default = "default_embed_url")]
    pub embed_url: String,
    /// Embedding model identifier.
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
    /// Embedding dimensionality.
    #[serde(default = "default_embed_dims")]
    pub embed_dims: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            searxng_url: default_searxng_url(),
            search_workflow_url: String::new(),
            fetch_workflow_url: String::new(),
            chat_url: default_chat_url(),
            chat_model: default_chat_model(),
            chat_api_key_env: default_chat_key_env(),
            embed_url: default_embed_url(),
            embed_model: default_embed_model(),
            embed_dims: default_embed_dims(),
        }
    }
}

/// Artifact store backend selection.
#[derive(Debug, Deserialize)]
pub struct ArtifactsConfig {
    /// Backend mode: "local" or "http".
    #[serde(default = "default_artifact_mode")]
    pub mode: String,
    /// Object service base URL for http mode.
    #[serde(default)]
    pub base_url: String,
    /// Filesystem root for local mode.
    #[serde(default = "default_artifact_root")]
    pub root_dir: String,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            mode: default_artifact_mode(),
            base_url: String::new(),
            root_dir: default_artifact_root(),
        }
    }
}

/// Vector store settings. An empty base URL disables warm context.
#[derive(Debug, Deserialize)]
pub struct VectorConfig {
    /// Vector service base URL; empty disables indexing and warm search.
    #[serde(default)]
    pub base_url: String,
    /// Collection name.
    #[serde(default = "default_vector_collection")]
    pub collection: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            collection: default_vector_collection(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, applying env overlays.
    ///
    /// A missing file yields the defaults, so a fresh checkout runs.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config: Self = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
            toml::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?
        } else {
            Self::default()
        };

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                config.database.url = url;
            }
        }
        Ok(config)
    }

    /// Resolve the engine knobs from the file sections.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_concurrent: self.engine.max_concurrent,
            max_steps: self.engine.max_steps,
            max_job_seconds: self.engine.max_job_seconds,
            max_llm_tokens: self.engine.max_llm_tokens,
            max_context: self.engine.max_context,
            max_notes_for_synth: self.engine.max_notes_for_synth,
            warm_notes_limit: self.engine.warm_notes_limit,
            warm_importance_min: self.engine.warm_importance_min,
            rescue_start_seconds: self.rescue.start_seconds,
            rescue_heartbeat_seconds: self.rescue.heartbeat_seconds,
            rescue_grace_seconds: self.rescue.grace_seconds,
            longform_enabled: self.features.longform_enabled,
            max_iterations: self.iteration.max_iterations,
            iteration_token_budget: self.iteration.token_budget,
        }
    }

    /// The chat API key from the configured environment variable.
    pub fn chat_api_key(&self) -> Option<String> {
        std::env::var(&self.tools.chat_api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }

    /// Parse `key=value` pairs from CLI `--meta` flags.
    pub fn parse_meta_pairs(pairs: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
        let mut map = BTreeMap::new();
        for pair in pairs {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("invalid metadata pair (expected k=v): {pair}"))?;
            map.insert(key.trim().to_owned(), value.trim().to_owned());
        }
        Ok(map)
    }
}

fn default_logs_dir() -> String {
    "logs".to_owned()
}

fn default_database_url() -> String {
    "postgres://localhost/fathom".to_owned()
}

fn default_pool_size() -> u32 {
    8
}

fn default_max_concurrent() -> usize {
    2
}

fn default_max_steps() -> u32 {
    5
}

fn default_max_job_seconds() -> u64 {
    1800
}

fn default_max_llm_tokens() -> u32 {
    2048
}

fn default_max_context() -> u32 {
    16384
}

fn default_max_notes_for_synth() -> usize {
    40
}

fn default_warm_notes_limit() -> u32 {
    5
}

fn default_warm_importance_min() -> u8 {
    3
}

fn default_rescue_start() -> u64 {
    120
}

fn default_rescue_heartbeat() -> u64 {
    300
}

fn default_rescue_grace() -> u64 {
    60
}

fn default_max_iterations() -> u32 {
    1
}

fn default_iteration_token_budget() -> u32 {
    8192
}

fn default_searxng_url() -> String {
    "http://localhost:8888".to_owned()
}

fn default_chat_url() -> String {
    "http://localhost:11434".to_owned()
}

fn default_chat_model() -> String {
    "llama3".to_owned()
}

fn default_chat_key_env() -> String {
    "FATHOM_CHAT_API_KEY".to_owned()
}

fn default_embed_url() -> String {
    "http://localhost:11434/api/embed".to_owned()
}

fn default_embed_model() -> String {
    "nomic-embed-text".to_owned()
}

fn default_embed_dims() -> usize {
    768
}

fn default_artifact_mode() -> String {
    "local".to_owned()
}

fn default_artifact_root() -> String {
    "artifacts".to_owned()
}

fn default_vector_collection() -> String {
    "fathom_notes".to_owned()
}
