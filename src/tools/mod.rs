//! Tool gateway: thin adapters fronting the external search, fetch,
//! language-model, and embedding endpoints.
//!
//! Each adapter wraps one HTTP endpoint, surfaces typed errors, and records
//! per-tool latency and error counters. The traits are the seams the engine
//! is tested through; mock implementations live next to the tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod chat;
pub mod embed;
pub mod fetch;
pub mod search;

/// Errors returned by tool gateway adapters.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// HTTP transport failure.
    #[error("tool request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Response did not match the expected schema.
    #[error("tool response parse error: {0}")]
    Parse(String),

    /// Upstream endpoint responded with a non-success status.
    #[error("tool returned non-success status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Raw response body, truncated.
        body: String,
    },

    /// The payload exceeded the endpoint's token ceiling.
    #[error("payload exceeds token ceiling: {0}")]
    TokenCeiling(String),

    /// No tool in the priority chain produced a usable result.
    #[error("all tools in chain failed: {0}")]
    Exhausted(String),
}

impl ToolError {
    /// Whether this error indicates the payload was too large for the
    /// endpoint's token ceiling. Drives the embed shrink-retry loop.
    pub fn is_token_exceeded(&self) -> bool {
        match self {
            Self::TokenCeiling(_) => true,
            Self::HttpStatus { status: 413, .. } => true,
            Self::HttpStatus { body, .. } => {
                let lower = body.to_lowercase();
                lower.contains("token") || lower.contains("less than 512")
            }
            _ => false,
        }
    }
}

/// Check an HTTP response status and return its body or a structured error.
///
/// # Errors
///
/// Returns [`ToolError::Request`] on transport failure and
/// [`ToolError::HttpStatus`] on non-2xx.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, ToolError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ToolError::HttpStatus {
            status: status.as_u16(),
            body: truncate_body(&body),
        });
    }
    Ok(body)
}

/// Collapse and truncate an error body so logs stay readable.
fn truncate_body(raw: &str) -> String {
    const MAX_ERROR_BODY_CHARS: usize = 256;
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened: String = collapsed.chars().take(MAX_ERROR_BODY_CHARS).collect();
        return format!("{shortened}...[truncated]");
    }
    collapsed
}

// ── Shared request/response types ───────────────────────────────

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Result title.
    pub title: String,
    /// Result URL.
    pub url: String,
    /// Short excerpt.
    #[serde(default)]
    pub snippet: String,
}

/// A fetched document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: String,
    /// Page title, best effort.
    pub title: String,
    /// Extracted text content.
    pub content: String,
}

/// Conversation participant role for chat calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System instruction.
    System,
    /// User turn.
    User,
    /// Assistant turn.
    Assistant,
}

/// A message in a chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Build a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Build a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Options for a chat call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatOptions {
    /// Maximum tokens in the response.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f64>,
}

// ── Traits ──────────────────────────────────────────────────────

/// A single named search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run a search and return up to `limit` results.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] on transport, status, or parse failure.
    async fn search(&self, query: &str, limit: u32) -> Result<Vec<SearchResult>, ToolError>;

    /// The backend's name, matched against step tool hints.
    fn name(&self) -> &str;
}

/// A single fetch backend.
#[async_trait]
pub trait FetchProvider: Send + Sync {
    /// Fetch a document and extract its text.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] on transport, status, or parse failure.
    async fn fetch(&self, url: &str) -> Result<FetchedPage, ToolError>;

    /// The backend's name, for logging.
    fn name(&self) -> &str;
}

/// The language-model chat endpoint.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Request a completion; returns the assistant's text.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] on transport, status, or parse failure.
    async fn chat(&self, messages: &[ChatMessage], opts: ChatOptions)
        -> Result<String, ToolError>;
}

/// The embedding endpoint.
#[async_trait]
pub trait EmbedProvider: Send + Sync {
    /// Embed a text into a vector.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] on transport, status, or parse failure, and a
    /// token-exceeded error when the payload is too large.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ToolError>;

    /// Dimensionality of produced vectors.
    fn dimensions(&self) -> usize;
}
