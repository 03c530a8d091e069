//! Search adapters and the priority-ordered search router.
//!
//! Two backends are implemented:
//! - [`SearxngSearch`] — a SearXNG instance's JSON API (primary)
//! - [`WorkflowSearch`] — the search workflow endpoint (fallback)
//!
//! The [`SearchRouter`] consults the step's tool hint first, then the default
//! fallback order, returning the first non-empty result set.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{check_http_response, SearchProvider, SearchResult, ToolError};
use crate::metrics::Metrics;

/// SearXNG JSON search adapter.
pub struct SearxngSearch {
    client: reqwest::Client,
    base_url: String,
}

impl SearxngSearch {
    /// Create an adapter for a SearXNG instance.
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }
}

#[async_trait]
impl SearchProvider for SearxngSearch {
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<SearchResult>, ToolError> {
        let url = format!("{}/search", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("q", query), ("format", "json")])
            .send()
            .await?;
        let body = check_http_response(response).await?;

        let parsed: SearxngResponse =
            serde_json::from_str(&body).map_err(|e| ToolError::Parse(e.to_string()))?;
        Ok(parsed
            .results
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .map(|r| SearchResult {
                title: r.title,
                url: r.url,
                snippet: r.content.unwrap_or_default(),
            })
            .collect())
    }

    fn name(&self) -> &str {
        "searxng"
    }
}

/// Search workflow endpoint adapter.
pub struct WorkflowSearch {
    client: reqwest::Client,
    endpoint: String,
}

impl WorkflowSearch {
    /// Create an adapter for the workflow search endpoint.
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_owned(),
        }
    }
}

#[async_trait]
impl SearchProvider for WorkflowSearch {
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<SearchResult>, ToolError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "query": query, "k": limit }))
            .send()
            .await?;
        let body = check_http_response(response).await?;

        let parsed: WorkflowSearchResponse =
            serde_json::from_str(&body).map_err(|e| ToolError::Parse(e.to_string()))?;
        Ok(parsed.results)
    }

    fn name(&self) -> &str {
        "workflow"
    }
}

/// Priority-ordered search dispatch.
///
/// The order of `providers` is the default fallback order; a tool hint
/// promotes the matching provider to the front for that call.
pub struct SearchRouter {
    providers: Vec<Arc<dyn SearchProvider>>,
    metrics: Arc<Metrics>,
}

impl SearchRouter {
    /// Build a router over providers in default priority order.
    pub fn new(providers: Vec<Arc<dyn SearchProvider>>, metrics: Arc<Metrics>) -> Self {
        Self { providers, metrics }
    }

    /// Search with an optional tool hint, returning the first non-empty
    /// result set in priority order.
    ///
    /// Failing providers are logged and counted, then skipped; only full
    /// exhaustion returns an empty set.
    pub async fn search(
        &self,
        query: &str,
        hint: Option<&str>,
        limit: u32,
    ) -> Vec<SearchResult> {
        let mut order: Vec<&Arc<dyn SearchProvider>> = Vec::with_capacity(self.providers.len());
        if let Some(hint) = hint {
            if let Some(preferred) = self.providers.iter().find(|p| p.name() == hint) {
                order.push(preferred);
            }
        }
        for provider in &self.providers {
            if !order.iter().any(|p| p.name() == provider.name()) {
                order.push(provider);
            }
        }

        for provider in order {
            let started = Instant::now();
            match provider.search(query, limit).await {
                Ok(results) => {
                    self.metrics.search.observe(started.elapsed());
                    if results.is_empty() {
                        debug!(provider = provider.name(), query, "empty result set");
                        continue;
                    }
                    debug!(
                        provider = provider.name(),
                        hits = results.len(),
                        "search succeeded"
                    );
                    return results;
                }
                Err(e) => {
                    self.metrics.search.observe(started.elapsed());
                    self.metrics.search.record_error();
                    warn!(provider = provider.name(), error = %e, "search failed, trying next");
                }
            }
        }
        Vec::new()
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Response body from SearXNG `/search?format=json`.
#[derive(Debug, Deserialize)]
struct SearxngResponse {
    #[serde(default)]
    results: Vec<SearxngResult>,
}

/// One SearXNG result.
#[derive(Debug, Deserialize)]
struct SearxngResult {
    title: String,
    url: String,
    #[serde(default)]
    content: Option<String>,
}

/// Response body from the workflow search endpoint.
#[derive(Debug, Deserialize)]
struct WorkflowSearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}
