//! Planner: turns a research question into an ordered list of steps.
//!
//! The planner prompt demands strict JSON but the parser tolerates prose
//! around it (a markdown fence, reasoning preambles). When no plan can be
//! recovered the executor falls back to a single default research step, so
//! planner quality degrades without ever failing a job.

use serde::Deserialize;
use thiserror::Error;

use crate::tools::{ChatMessage, ChatOptions};
use crate::types::NewStep;

/// Planner role prompt.
const PLANNER_PROMPT: &str = "\
You are the research planner. Break the research question into a short \
ordered list of investigative steps. Each step should target one distinct \
angle of the question and be answerable through web search.

Output strict JSON, nothing else:
{
  \"steps\": [
    { \"title\": \"...\", \"tool_hint\": \"searxng\", \"objective\": \"...\", \"theme\": \"...\" }
  ]
}

Rules:
- at most the requested number of steps
- tool_hint is optional; use \"searxng\" for general web research
- objective is one sentence describing what the step must establish";

/// Expansion role prompt for follow-up iterations.
const EXPANSION_PROMPT: &str = "\
You are the research planner reviewing progress so far. Based on the step \
summaries below, propose follow-up steps that close the most important gaps. \
Propose nothing when coverage is already adequate.

Output strict JSON, nothing else:
{ \"steps\": [ { \"title\": \"...\", \"tool_hint\": \"searxng\", \"objective\": \"...\" } ] }";

/// Title of the fallback step used when planning fails.
pub const FALLBACK_STEP_TITLE: &str = "Perform initial web research";

/// One planned step as returned by the model.
#[derive(Debug, Clone, Deserialize)]
pub struct PlannedStep {
    /// Step title.
    pub title: String,
    /// Optional preferred search backend.
    #[serde(default)]
    pub tool_hint: Option<String>,
    /// What the step must establish.
    #[serde(default)]
    pub objective: Option<String>,
    /// Optional grouping tag.
    #[serde(default)]
    pub theme: Option<String>,
}

/// The planner's JSON envelope.
#[derive(Debug, Clone, Deserialize)]
struct PlannerOutput {
    #[serde(default)]
    steps: Vec<PlannedStep>,
}

/// Context assembled for a planning call.
#[derive(Debug, Clone, Default)]
pub struct PlannerContext {
    /// Step summaries and cross-job summaries already recorded for this job.
    pub prior_summaries: Vec<String>,
    /// Warm archive notes retrieved from the vector store.
    pub warm_notes: Vec<String>,
}

/// Planner errors. Callers always have a fallback, so these are warnings.
#[derive(Debug, Error)]
pub enum PlannerError {
    /// The response contained no parsable JSON plan.
    #[error("could not parse plan from response: {0}")]
    InvalidFormat(String),
}

/// Compose the chat messages for an initial planning call.
pub fn compose_messages(
    question: &str,
    max_steps: u32,
    ctx: &PlannerContext,
) -> Vec<ChatMessage> {
    let mut user = format!("Research question: {question}\nMaximum steps: {max_steps}");
    if !ctx.prior_summaries.is_empty() {
        user.push_str("\n\nContext from earlier work on this job:\n");
        for summary in &ctx.prior_summaries {
            user.push_str("- ");
            user.push_str(summary);
            user.push('\n');
        }
    }
    if !ctx.warm_notes.is_empty() {
        user.push_str("\nRelated findings from previous research jobs:\n");
        for note in &ctx.warm_notes {
            user.push_str("- ");
            user.push_str(note);
            user.push('\n');
        }
    }
    vec![ChatMessage::system(PLANNER_PROMPT), ChatMessage::user(user)]
}

/// Compose the chat messages for an expansion round.
pub fn compose_expansion_messages(
    question: &str,
    remaining_steps: u32,
    step_summaries: &[String],
) -> Vec<ChatMessage> {
    let mut user = format!(
        "Research question: {question}\nMaximum additional steps: {remaining_steps}\n\n\
         Step summaries so far:\n"
    );
    for summary in step_summaries {
        user.push_str("- ");
        user.push_str(summary);
        user.push('\n');
    }
    vec![ChatMessage::system(EXPANSION_PROMPT), ChatMessage::user(user)]
}

/// Chat options for planner calls: strict, short.
pub fn chat_options(max_tokens: u32) -> ChatOptions {
    ChatOptions {
        max_tokens: Some(max_tokens),
        temperature: Some(0.2),
    }
}

/// Parse the model response into planned steps.
///
/// Tries raw JSON first, then a fenced JSON block. Steps without a title are
/// dropped.
///
/// # Errors
///
/// Returns [`PlannerError::InvalidFormat`] when no JSON plan is present.
pub fn parse_plan(response: &str) -> Result<Vec<PlannedStep>, PlannerError> {
    let trimmed = response.trim();

    if let Ok(output) = serde_json::from_str::<PlannerOutput>(trimmed) {
        return Ok(retain_titled(output.steps));
    }

    if let Some(block) = extract_json_block(trimmed) {
        if let Ok(output) = serde_json::from_str::<PlannerOutput>(block) {
            return Ok(retain_titled(output.steps));
        }
    }

    Err(PlannerError::InvalidFormat(truncate(trimmed, 200)))
}

/// Convert planned steps to insertable rows, truncated to `max_steps`.
pub fn to_new_steps(planned: Vec<PlannedStep>, iteration: u32, max_steps: u32) -> Vec<NewStep> {
    planned
        .into_iter()
        .take(usize::try_from(max_steps).unwrap_or(usize::MAX))
        .map(|step| NewStep {
            title: step.title,
            tool_hint: step.tool_hint,
            objective: step.objective,
            theme: step.theme,
            iteration,
        })
        .collect()
}

/// The single default step used when planning fails entirely.
pub fn fallback_plan() -> Vec<NewStep> {
    vec![NewStep {
        title: FALLBACK_STEP_TITLE.to_owned(),
        tool_hint: Some("searxng".to_owned()),
        objective: Some("Collect an initial set of relevant sources".to_owned()),
        theme: None,
        iteration: 0,
    }]
}

fn retain_titled(steps: Vec<PlannedStep>) -> Vec<PlannedStep> {
    steps
        .into_iter()
        .filter(|s| !s.title.trim().is_empty())
        .collect()
}

/// Extract the contents of the first fenced code block.
pub(crate) fn extract_json_block(text: &str) -> Option<&str> {
    let after_fence = if let Some(pos) = text.find("```json") {
        text.get(pos.checked_add(7)?..)?
    } else {
        let pos = text.find("```")?;
        text.get(pos.checked_add(3)?..)?
    };
    let end = after_fence.find("```")?;
    Some(after_fence.get(..end)?.trim())
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let shortened: String = text.chars().take(max_chars).collect();
    format!("{shortened}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_raw_json() {
        let response = r#"{"steps":[{"title":"Map the regulation","objective":"Identify scope"}]}"#;
        let steps = parse_plan(response).expect("parse");
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].title, "Map the regulation");
        assert_eq!(steps[0].objective.as_deref(), Some("Identify scope"));
        assert!(steps[0].tool_hint.is_none());
    }

    #[test]
    fn test_parse_fenced_json() {
        let response = "Here is the plan:\n```json\n{\"steps\":[{\"title\":\"A\"},{\"title\":\"B\"}]}\n```\nDone.";
        let steps = parse_plan(response).expect("parse");
        assert_eq!(steps.len(), 2);
    }

    #[test]
    fn test_parse_rejects_prose() {
        let err = parse_plan("I could not produce a plan, sorry.").expect_err("no json");
        assert!(matches!(err, PlannerError::InvalidFormat(_)));
    }

    #[test]
    fn test_parse_drops_untitled_steps() {
        let response = r#"{"steps":[{"title":""},{"title":"Real"}]}"#;
        let steps = parse_plan(response).expect("parse");
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].title, "Real");
    }

    #[test]
    fn test_to_new_steps_truncates_to_max() {
        let planned = vec![
            PlannedStep {
                title: "1".to_owned(),
                tool_hint: None,
                objective: None,
                theme: None,
            },
            PlannedStep {
                title: "2".to_owned(),
                tool_hint: None,
                objective: None,
                theme: None,
            },
            PlannedStep {
                title: "3".to_owned(),
                tool_hint: None,
                objective: None,
                theme: None,
            },
        ];
        let steps = to_new_steps(planned, 0, 2);
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|s| s.iteration == 0));
    }

    #[test]
    fn test_fallback_plan_shape() {
        let steps = fallback_plan();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].title, FALLBACK_STEP_TITLE);
        assert_eq!(steps[0].tool_hint.as_deref(), Some("searxng"));
        assert_eq!(steps[0].iteration, 0);
    }

    #[test]
    fn test_compose_includes_context() {
        let ctx = PlannerContext {
            prior_summaries: vec!["earlier summary".to_owned()],
            warm_notes: vec!["archived finding".to_owned()],
        };
        let messages = compose_messages("the question", 5, &ctx);
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.contains("the question"));
        assert!(messages[1].content.contains("earlier summary"));
        assert!(messages[1].content.contains("archived finding"));
        assert!(messages[1].content.contains("Maximum steps: 5"));
    }
}
