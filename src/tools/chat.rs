//! Language-model chat adapter.
//!
//! Wraps an OpenAI-compatible `/v1/chat/completions` endpoint. Planner and
//! critic callers ask for strict JSON output but tolerate free text; parsing
//! happens upstream so this adapter only moves strings.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use super::{check_http_response, ChatMessage, ChatOptions, ChatProvider, ToolError};
use crate::metrics::Metrics;

/// Chat adapter over an OpenAI-compatible completion endpoint.
pub struct HttpChat {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    metrics: Arc<Metrics>,
}

impl HttpChat {
    /// Create a chat adapter.
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: Option<String>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            model: model.to_owned(),
            api_key,
            metrics,
        }
    }
}

#[async_trait]
impl ChatProvider for HttpChat {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        opts: ChatOptions,
    ) -> Result<String, ToolError> {
        let wire_messages: Vec<WireMessage<'_>> = messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    super::ChatRole::System => "system",
                    super::ChatRole::User => "user",
                    super::ChatRole::Assistant => "assistant",
                },
                content: &m.content,
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": wire_messages,
        });
        if let Some(max_tokens) = opts.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = opts.temperature {
            body["temperature"] = json!(temperature);
        }

        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let started = Instant::now();
        let result = async {
            let response = request.send().await?;
            let payload = check_http_response(response).await?;
            let parsed: Value =
                serde_json::from_str(&payload).map_err(|e| ToolError::Parse(e.to_string()))?;
            parse_completion_text(&parsed)
        }
        .await;

        self.metrics.chat.observe(started.elapsed());
        if result.is_err() {
            self.metrics.chat.record_error();
        }
        result
    }
}

/// Pull the assistant text out of a chat-completions response.
fn parse_completion_text(value: &Value) -> Result<String, ToolError> {
    value
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| ToolError::Parse("missing choices[0].message.content".to_owned()))
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One message in the completion request body.
#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    /// Provider role string.
    role: &'a str,
    /// Message text.
    content: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion_text() {
        let value = json!({
            "choices": [{"message": {"role": "assistant", "content": "hello"}}]
        });
        assert_eq!(parse_completion_text(&value).expect("parse"), "hello");
    }

    #[test]
    fn test_parse_completion_missing_content() {
        let value = json!({"choices": []});
        assert!(parse_completion_text(&value).is_err());
    }
}
