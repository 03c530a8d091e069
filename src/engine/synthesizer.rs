//! Synthesis: turn packed evidence notes into a draft report.
//!
//! Two modes share this module:
//! - *Classic*: one synthesis chat call over all packed notes.
//! - *Longform*: per-section note selection rendered deterministically with
//!   inline citation markers; sections are persisted as drafts and joined
//!   with short bridging sentences.
//!
//! Both modes finish with a critic pass whose "limitations" feedback is
//! appended to the draft.

use serde::Deserialize;

use super::planner::{extract_json_block, truncate};
use crate::tools::{ChatMessage, ChatOptions};
use crate::types::{Note, NoteRole, SectionKey};

/// Synthesis role prompt for classic mode.
const SYNTHESIS_PROMPT: &str = "\
You are a research writer. Synthesize the evidence notes below into a \
structured report answering the research question. Cite evidence with \
bracketed numbers like [1] where the notes carry them. Be precise about \
uncertainty; never invent sources.";

/// Critic role prompt.
const CRITIC_PROMPT: &str = "\
You are a research critic. Review the draft report against the evidence \
notes. Identify unsupported claims, missing angles, and limitations of the \
evidence base.

Output strict JSON, nothing else:
{ \"issues\": [\"...\"], \"follow_up\": [\"...\"], \"limitations\": \"...\" }";

/// Heading of the critic-sourced closing block.
pub const LIMITATIONS_HEADING: &str = "## Limitations & Critic Notes";

/// Per-section selection rules for longform mode.
#[derive(Debug, Clone, Copy)]
pub struct SectionSpec {
    /// Which section this spec renders.
    pub key: SectionKey,
    /// Note roles admitted into the section.
    pub roles: &'static [NoteRole],
    /// Cap on notes rendered into the section.
    pub max_notes: usize,
    /// Bridging sentence appended after the section.
    pub bridge: &'static str,
}

/// Longform section configuration, in report order.
pub const SECTION_SPECS: [SectionSpec; 4] = [
    SectionSpec {
        key: SectionKey::ExecutiveSummary,
        roles: &[NoteRole::StepSummary, NoteRole::CrossJobSummary],
        max_notes: 6,
        bridge: "The sections below lay out the evidence behind this summary.",
    },
    SectionSpec {
        key: SectionKey::Background,
        roles: &[NoteRole::PageSummary],
        max_notes: 8,
        bridge: "With this context established, the analysis turns to the core question.",
    },
    SectionSpec {
        key: SectionKey::Analysis,
        roles: &[NoteRole::PageSummary, NoteRole::StepSummary],
        max_notes: 12,
        bridge: "These findings point to a set of concrete recommendations.",
    },
    SectionSpec {
        key: SectionKey::Recommendations,
        roles: &[NoteRole::StepSummary, NoteRole::CriticNote],
        max_notes: 6,
        bridge: "",
    },
];

/// Select a section's notes: filter by role allow-list, order by
/// (importance desc, token_count desc), take up to the section cap.
pub fn select_section_notes(notes: &[Note], spec: &SectionSpec) -> Vec<Note> {
    let mut selected: Vec<Note> = notes
        .iter()
        .filter(|n| spec.roles.contains(&n.role))
        .cloned()
        .collect();
    super::context::pack_order(&mut selected);
    selected.truncate(spec.max_notes);
    selected
}

/// Render one note's text with its inline citation markers appended.
pub fn render_note_with_citations(content: &str, citation_numbers: &[u32]) -> String {
    if citation_numbers.is_empty() {
        return content.to_owned();
    }
    let markers: String = citation_numbers.iter().map(|n| format!(" [{n}]")).collect();
    format!("{content}{markers}")
}

/// Join completed section bodies into the longform draft.
///
/// `sections` pairs each spec with its rendered body, in report order.
pub fn join_sections(sections: &[(SectionSpec, String)]) -> String {
    let mut draft = String::new();
    let last = sections.len().saturating_sub(1);
    for (i, (spec, body)) in sections.iter().enumerate() {
        draft.push_str(&format!("## {}\n\n{}\n", spec.key.heading(), body.trim_end()));
        if i < last && !spec.bridge.is_empty() {
            draft.push_str(&format!("\n{}\n", spec.bridge));
        }
        draft.push('\n');
    }
    draft.trim_end().to_owned()
}

/// Compose the chat messages for a classic synthesis call.
pub fn compose_classic_messages(question: &str, notes: &[Note]) -> Vec<ChatMessage> {
    let mut user = format!("Research question: {question}\n\n# Evidence notes\n");
    for (i, note) in notes.iter().enumerate() {
        let ordinal = i.saturating_add(1);
        user.push_str(&format!(
            "\n[note {ordinal}] (role: {}, importance: {})\n{}\n",
            note.role.as_str(),
            note.importance,
            note.content
        ));
    }
    vec![ChatMessage::system(SYNTHESIS_PROMPT), ChatMessage::user(user)]
}

/// Chat options for synthesis calls.
pub fn chat_options(max_tokens: u32) -> ChatOptions {
    ChatOptions {
        max_tokens: Some(max_tokens),
        temperature: Some(0.4),
    }
}

/// Degraded classic draft used when the synthesis call itself fails:
/// the packed notes in order, grouped under a plain heading.
pub fn fallback_draft(question: &str, notes: &[Note]) -> String {
    let mut draft = format!("## Findings\n\nCollected evidence for: {question}\n");
    for note in notes {
        draft.push_str("\n- ");
        draft.push_str(&note.content);
        draft.push('\n');
    }
    draft
}

// ── Critic ──────────────────────────────────────────────────────

/// Parsed critic output.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CriticOutput {
    /// Unsupported or questionable claims.
    #[serde(default)]
    pub issues: Vec<String>,
    /// Follow-up research suggestions.
    #[serde(default)]
    pub follow_up: Vec<String>,
    /// Prose description of the evidence base's limits.
    #[serde(default)]
    pub limitations: String,
}

impl CriticOutput {
    /// Whether the critic produced anything worth recording.
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty() && self.follow_up.is_empty() && self.limitations.trim().is_empty()
    }
}

/// Compose the chat messages for the critic call.
pub fn compose_critic_messages(question: &str, draft: &str, notes: &[Note]) -> Vec<ChatMessage> {
    let mut user = format!("Research question: {question}\n\n# Draft report\n\n{draft}\n\n# Evidence notes\n");
    for note in notes {
        user.push_str("\n- ");
        user.push_str(&note.content);
    }
    vec![ChatMessage::system(CRITIC_PROMPT), ChatMessage::user(user)]
}

/// Parse the critic response; `None` means the critic block is omitted.
pub fn parse_critic(response: &str) -> Option<CriticOutput> {
    let trimmed = response.trim();
    if let Ok(output) = serde_json::from_str::<CriticOutput>(trimmed) {
        return Some(output);
    }
    if let Some(block) = extract_json_block(trimmed) {
        if let Ok(output) = serde_json::from_str::<CriticOutput>(block) {
            return Some(output);
        }
    }
    tracing::warn!(
        response = %truncate(trimmed, 120),
        "critic output unparsable, omitting critic block"
    );
    None
}

/// Append the critic's limitations block when it has content.
pub fn append_limitations(draft: &str, critic: &CriticOutput) -> String {
    if critic.limitations.trim().is_empty() {
        return draft.to_owned();
    }
    let mut out = format!("{}\n\n{LIMITATIONS_HEADING}\n\n{}\n", draft.trim_end(), critic.limitations.trim());
    if !critic.issues.is_empty() {
        out.push_str("\nOpen issues:\n");
        for issue in &critic.issues {
            out.push_str("- ");
            out.push_str(issue);
            out.push('\n');
        }
    }
    out
}
