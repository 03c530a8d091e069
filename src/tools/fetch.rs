//! Fetch adapters and the workflow-then-direct fallback chain.
//!
//! The workflow endpoint does the heavy extraction; when it is down the
//! [`DirectFetch`] fallback GETs the page itself, strips `<script>` and
//! `<style>` blocks plus remaining tags, and collapses whitespace.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{check_http_response, FetchProvider, FetchedPage, ToolError};
use crate::metrics::Metrics;

/// Fetch workflow endpoint adapter.
pub struct WorkflowFetch {
    client: reqwest::Client,
    endpoint: String,
}

impl WorkflowFetch {
    /// Create an adapter for the workflow fetch endpoint.
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_owned(),
        }
    }
}

#[async_trait]
impl FetchProvider for WorkflowFetch {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, ToolError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await?;
        let body = check_http_response(response).await?;

        let parsed: WorkflowFetchResponse =
            serde_json::from_str(&body).map_err(|e| ToolError::Parse(e.to_string()))?;
        Ok(FetchedPage {
            url: parsed.url.unwrap_or_else(|| url.to_owned()),
            title: parsed.title.unwrap_or_default(),
            content: parsed.content,
        })
    }

    fn name(&self) -> &str {
        "workflow"
    }
}

/// Direct HTTP GET fallback with naive HTML-to-text extraction.
pub struct DirectFetch {
    client: reqwest::Client,
}

impl Default for DirectFetch {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectFetch {
    /// Create the direct fetcher.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl FetchProvider for DirectFetch {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, ToolError> {
        let response = self.client.get(url).send().await?;
        let final_url = response.url().to_string();
        let body = check_http_response(response).await?;

        Ok(FetchedPage {
            title: extract_title(&body).unwrap_or_default(),
            content: strip_html(&body),
            url: final_url,
        })
    }

    fn name(&self) -> &str {
        "direct"
    }
}

/// Strip script/style blocks and all tags, then collapse whitespace.
pub fn strip_html(html: &str) -> String {
    // Patterns are static and known-good; a regex build failure would mean a
    // broken binary, so fall back to the raw text rather than panic.
    let scripts = Regex::new(r"(?is)<script\b[^>]*>.*?</script>")
        .map(|re| re.replace_all(html, " ").into_owned())
        .unwrap_or_else(|_| html.to_owned());
    let styles = Regex::new(r"(?is)<style\b[^>]*>.*?</style>")
        .map(|re| re.replace_all(&scripts, " ").into_owned())
        .unwrap_or(scripts);
    let tags = Regex::new(r"(?s)<[^>]+>")
        .map(|re| re.replace_all(&styles, " ").into_owned())
        .unwrap_or(styles);
    tags.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Best-effort `<title>` extraction.
fn extract_title(html: &str) -> Option<String> {
    let re = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").ok()?;
    let captured = re.captures(html)?.get(1)?.as_str();
    let title = captured.split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

/// Workflow-then-direct fetch chain.
pub struct FetchChain {
    workflow: Option<Arc<dyn FetchProvider>>,
    direct: Arc<dyn FetchProvider>,
    metrics: Arc<Metrics>,
}

impl FetchChain {
    /// Build the chain. `workflow` is tried first when configured.
    pub fn new(
        workflow: Option<Arc<dyn FetchProvider>>,
        direct: Arc<dyn FetchProvider>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            workflow,
            direct,
            metrics,
        }
    }

    /// Fetch a document, preferring the workflow endpoint.
    ///
    /// # Errors
    ///
    /// Returns the direct fetcher's error when both backends fail.
    pub async fn fetch(&self, url: &str) -> Result<FetchedPage, ToolError> {
        if let Some(workflow) = &self.workflow {
            let started = Instant::now();
            match workflow.fetch(url).await {
                Ok(page) => {
                    self.metrics.fetch.observe(started.elapsed());
                    return Ok(page);
                }
                Err(e) => {
                    self.metrics.fetch.observe(started.elapsed());
                    self.metrics.fetch.record_error();
                    warn!(url, error = %e, "workflow fetch failed, falling back to direct");
                }
            }
        }

        let started = Instant::now();
        let result = self.direct.fetch(url).await;
        self.metrics.fetch.observe(started.elapsed());
        if result.is_err() {
            self.metrics.fetch.record_error();
        } else {
            debug!(url, "direct fetch succeeded");
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Response body from the workflow fetch endpoint.
#[derive(Debug, Deserialize)]
struct WorkflowFetchResponse {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    content: String,
}
