//! Summarizer: condenses fetched pages into evidence notes.
//!
//! One call per step covers all of that step's fetched documents. The model
//! returns per-page notes plus an optional step summary; when its output is
//! unparsable the heuristic fallback takes the opening of each page instead,
//! so a step always yields notes if it yielded documents.

use serde::Deserialize;

use super::planner::{extract_json_block, truncate};
use crate::tokens::clamp_to_tokens;
use crate::tools::{ChatMessage, ChatOptions, FetchedPage};

/// Summarizer role prompt.
const SUMMARIZER_PROMPT: &str = "\
You are a research summarizer. For each document below, write a dense \
factual note capturing what matters for the research question. Score each \
note's importance from 1 (background) to 5 (central finding). Then write a \
short step summary of what this batch of documents established.

Output strict JSON, nothing else:
{
  \"page_notes\": [
    { \"url\": \"...\", \"title\": \"...\", \"summary\": \"...\", \"importance\": 3 }
  ],
  \"step_summary\": \"...\"
}";

/// Approximate per-page token allowance in the summarizer prompt.
const PAGE_TOKEN_ALLOWANCE: usize = 2500;

/// Words taken by the heuristic fallback note.
const HEURISTIC_WORDS: usize = 120;

/// A page note returned by the model.
#[derive(Debug, Clone, Deserialize)]
pub struct PageNote {
    /// URL of the summarized page.
    #[serde(default)]
    pub url: Option<String>,
    /// Title of the summarized page.
    #[serde(default)]
    pub title: Option<String>,
    /// The note text.
    pub summary: String,
    /// Raw importance score; clamped by the caller.
    #[serde(default)]
    pub importance: Option<i64>,
}

/// The summarizer's parsed output.
#[derive(Debug, Clone, Deserialize)]
pub struct SummaryOutput {
    /// One note per summarized page.
    #[serde(default)]
    pub page_notes: Vec<PageNote>,
    /// Summary of the whole step.
    #[serde(default)]
    pub step_summary: Option<String>,
}

/// Compose the chat messages for a summarize call.
pub fn compose_messages(
    question: &str,
    step_title: &str,
    pages: &[FetchedPage],
) -> Vec<ChatMessage> {
    let mut user = format!("Research question: {question}\nCurrent step: {step_title}\n");
    for (i, page) in pages.iter().enumerate() {
        let ordinal = i.saturating_add(1);
        user.push_str(&format!(
            "\n## Document {ordinal}\nURL: {}\nTitle: {}\n\n{}\n",
            page.url,
            page.title,
            clamp_to_tokens(&page.content, PAGE_TOKEN_ALLOWANCE)
        ));
    }
    vec![ChatMessage::system(SUMMARIZER_PROMPT), ChatMessage::user(user)]
}

/// Chat options for summarize calls.
pub fn chat_options(max_tokens: u32) -> ChatOptions {
    ChatOptions {
        max_tokens: Some(max_tokens),
        temperature: Some(0.3),
    }
}

/// Parse the model response, raw JSON first, then a fenced block.
///
/// Returns `None` when no JSON output can be recovered; the caller then
/// falls back to [`heuristic_summary`].
pub fn parse_summary(response: &str) -> Option<SummaryOutput> {
    let trimmed = response.trim();
    if let Ok(output) = serde_json::from_str::<SummaryOutput>(trimmed) {
        return Some(output);
    }
    if let Some(block) = extract_json_block(trimmed) {
        if let Ok(output) = serde_json::from_str::<SummaryOutput>(block) {
            return Some(output);
        }
    }
    tracing::warn!(
        response = %truncate(trimmed, 120),
        "summarizer output unparsable, using heuristic notes"
    );
    None
}

/// Heuristic downgrade: one note per page from its opening words,
/// importance 3, no step summary.
pub fn heuristic_summary(pages: &[FetchedPage]) -> SummaryOutput {
    let page_notes = pages
        .iter()
        .map(|page| {
            let words: Vec<&str> = page.content.split_whitespace().collect();
            let taken = words.len().min(HEURISTIC_WORDS);
            let mut summary = words.get(..taken).unwrap_or(&[]).join(" ");
            if taken < words.len() {
                summary.push_str(" …");
            }
            PageNote {
                url: Some(page.url.clone()),
                title: Some(page.title.clone()),
                summary,
                importance: Some(3),
            }
        })
        .collect();
    SummaryOutput {
        page_notes,
        step_summary: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(url: &str, content: &str) -> FetchedPage {
        FetchedPage {
            url: url.to_owned(),
            title: format!("title {url}"),
            content: content.to_owned(),
        }
    }

    #[test]
    fn test_parse_summary_raw_json() {
        let response = r#"{
            "page_notes": [{"url": "https://a.example", "summary": "finding", "importance": 4}],
            "step_summary": "established the finding"
        }"#;
        let output = parse_summary(response).expect("parse");
        assert_eq!(output.page_notes.len(), 1);
        assert_eq!(output.page_notes[0].importance, Some(4));
        assert_eq!(output.step_summary.as_deref(), Some("established the finding"));
    }

    #[test]
    fn test_parse_summary_fenced() {
        let response = "```json\n{\"page_notes\": [], \"step_summary\": \"nothing new\"}\n```";
        let output = parse_summary(response).expect("parse");
        assert!(output.page_notes.is_empty());
    }

    #[test]
    fn test_parse_summary_prose_fails() {
        assert!(parse_summary("The documents describe...").is_none());
    }

    #[test]
    fn test_heuristic_takes_opening_words() {
        let long = "word ".repeat(500);
        let output = heuristic_summary(&[page("https://a.example", &long)]);
        assert_eq!(output.page_notes.len(), 1);
        let note = &output.page_notes[0];
        assert!(note.summary.split_whitespace().count() <= HEURISTIC_WORDS.saturating_add(1));
        assert!(note.summary.ends_with('…'));
        assert_eq!(note.importance, Some(3));
        assert!(output.step_summary.is_none());
    }

    #[test]
    fn test_heuristic_short_page_kept_whole() {
        let output = heuristic_summary(&[page("https://a.example", "just a few words")]);
        assert_eq!(output.page_notes[0].summary, "just a few words");
    }

    #[test]
    fn test_compose_clamps_page_content() {
        let huge = "word ".repeat(20_000);
        let messages = compose_messages("q", "step", &[page("https://a.example", &huge)]);
        let prompt_words = messages[1].content.split_whitespace().count();
        assert!(prompt_words < 5000, "page content must be clamped");
    }
}
