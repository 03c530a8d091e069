//! Embedding adapter with token-ceiling retry.
//!
//! The [`Embedder`] wrapper pre-clamps payloads to the endpoint's approximate
//! token ceiling and retries up to four times, shrinking the payload by 10%
//! whenever the endpoint reports a token-exceeded error.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{check_http_response, EmbedProvider, ToolError};
use crate::metrics::Metrics;
use crate::tokens::{clamp_for_embedding, shrink_by_tenth};

/// Maximum embed attempts before giving up.
const MAX_EMBED_ATTEMPTS: u32 = 4;

/// HTTP embedding endpoint adapter.
pub struct HttpEmbed {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
}

impl HttpEmbed {
    /// Create an embedding adapter.
    ///
    /// `dims` is the expected dimensionality of the produced vectors and is
    /// used by the vector store to size its collection.
    pub fn new(endpoint: &str, model: &str, dims: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_owned(),
            model: model.to_owned(),
            dims,
        }
    }
}

#[async_trait]
impl EmbedProvider for HttpEmbed {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ToolError> {
        let body = EmbedRequest {
            model: &self.model,
            input: text,
        };
        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let payload = check_http_response(response).await?;

        let parsed: EmbedResponse =
            serde_json::from_str(&payload).map_err(|e| ToolError::Parse(e.to_string()))?;
        parsed
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ToolError::Parse("empty embeddings array".to_owned()))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Shrink-and-retry wrapper around an embedding provider.
pub struct Embedder {
    provider: Arc<dyn EmbedProvider>,
    metrics: Arc<Metrics>,
}

impl Embedder {
    /// Wrap a provider.
    pub fn new(provider: Arc<dyn EmbedProvider>, metrics: Arc<Metrics>) -> Self {
        Self { provider, metrics }
    }

    /// Dimensionality of the wrapped provider.
    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Embed a text, pre-clamped to the token ceiling, retrying with a 10%
    /// smaller payload on each token-exceeded error.
    ///
    /// # Errors
    ///
    /// Returns the last error after [`MAX_EMBED_ATTEMPTS`] attempts, or the
    /// first non-token error.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ToolError> {
        let mut payload = clamp_for_embedding(text);
        let mut last_error: Option<ToolError> = None;

        for attempt in 1..=MAX_EMBED_ATTEMPTS {
            let started = Instant::now();
            let result = self.provider.embed(&payload).await;
            self.metrics.embed.observe(started.elapsed());

            match result {
                Ok(vector) => return Ok(vector),
                Err(e) if e.is_token_exceeded() && attempt < MAX_EMBED_ATTEMPTS => {
                    self.metrics.embed.record_error();
                    warn!(attempt, error = %e, "embed payload too large, shrinking");
                    payload = shrink_by_tenth(&payload);
                    last_error = Some(e);
                }
                Err(e) => {
                    self.metrics.embed.record_error();
                    return Err(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ToolError::Exhausted("embed retries exhausted".to_owned())))
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Request body for the embedding endpoint.
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    /// Model name.
    model: &'a str,
    /// Input text.
    input: &'a str,
}

/// Response body from the embedding endpoint.
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    /// One vector per input.
    embeddings: Vec<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    struct TokenLimitedEmbed {
        /// Word limit the fake endpoint accepts.
        word_limit: usize,
        calls: AtomicUsize,
        payload_log: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl EmbedProvider for TokenLimitedEmbed {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let words = text.split_whitespace().count();
            self.payload_log
                .lock()
                .expect("test lock")
                .push(words);
            if words > self.word_limit {
                return Err(ToolError::HttpStatus {
                    status: 413,
                    body: "input must be less than 512 tokens".to_owned(),
                });
            }
            Ok(vec![0.1, 0.2])
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn test_embed_succeeds_first_try() {
        let provider = Arc::new(TokenLimitedEmbed {
            word_limit: 1000,
            calls: AtomicUsize::new(0),
            payload_log: Mutex::new(Vec::new()),
        });
        let embedder = Embedder::new(provider.clone(), Arc::new(Metrics::default()));
        let vector = embedder.embed("a short text").await.expect("embed");
        assert_eq!(vector.len(), 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_embed_shrinks_on_token_error() {
        let provider = Arc::new(TokenLimitedEmbed {
            word_limit: 150,
            calls: AtomicUsize::new(0),
            payload_log: Mutex::new(Vec::new()),
        });
        let embedder = Embedder::new(provider.clone(), Arc::new(Metrics::default()));

        let text = "word ".repeat(200);
        embedder.embed(&text).await.expect("embed after shrink");

        let log = provider.payload_log.lock().expect("test lock");
        assert!(log.len() >= 2, "should have retried at least once");
        assert!(log.windows(2).all(|w| w[1] < w[0]), "payload must shrink");
    }

    #[tokio::test]
    async fn test_embed_gives_up_after_max_attempts() {
        let provider = Arc::new(TokenLimitedEmbed {
            word_limit: 0,
            calls: AtomicUsize::new(0),
            payload_log: Mutex::new(Vec::new()),
        });
        let embedder = Embedder::new(provider.clone(), Arc::new(Metrics::default()));

        let err = embedder.embed("some words here").await.expect_err("fails");
        assert!(err.is_token_exceeded());
        assert_eq!(
            provider.calls.load(Ordering::SeqCst),
            usize::try_from(MAX_EMBED_ATTEMPTS).expect("fits"),
        );
    }

    #[tokio::test]
    async fn test_embed_non_token_error_is_not_retried() {
        struct BrokenEmbed;

        #[async_trait]
        impl EmbedProvider for BrokenEmbed {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>, ToolError> {
                Err(ToolError::Parse("bad json".to_owned()))
            }

            fn dimensions(&self) -> usize {
                2
            }
        }

        let metrics = Arc::new(Metrics::default());
        let embedder = Embedder::new(Arc::new(BrokenEmbed), Arc::clone(&metrics));
        let err = embedder.embed("text").await.expect_err("fails fast");
        assert!(matches!(err, ToolError::Parse(_)));
        assert_eq!(metrics.embed.errors(), 1);
    }
}
