//! Report finalization: citation linkification and the references section.
//!
//! Bare markers `[n]` become markdown links `[n](#ref-n)` for every number
//! the ledger knows; unknown numbers are left untouched. The references
//! section provides the matching anchored targets.

use std::collections::HashSet;

use regex::Regex;

use crate::types::LedgerEntry;

/// Linkify bare citation markers for ledger-known numbers.
///
/// Markers already followed by a link target (`[n](`) are left alone, as are
/// numbers with no ledger entry.
pub fn linkify_citations(text: &str, ledger: &[LedgerEntry]) -> String {
    let known: HashSet<u32> = ledger.iter().map(|e| e.citation_number).collect();
    let Ok(re) = Regex::new(r"\[(\d+)\]") else {
        return text.to_owned();
    };

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    for captures in re.captures_iter(text) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        let number: Option<u32> = captures.get(1).and_then(|m| m.as_str().parse().ok());
        out.push_str(text.get(cursor..whole.start()).unwrap_or_default());
        cursor = whole.end();

        let already_linked = text.get(whole.end()..).is_some_and(|rest| rest.starts_with('('));
        match number {
            Some(n) if known.contains(&n) && !already_linked => {
                out.push_str(&format!("[{n}](#ref-{n})"));
            }
            _ => out.push_str(whole.as_str()),
        }
    }
    out.push_str(text.get(cursor..).unwrap_or_default());
    out
}

/// Render the references section with anchored link targets.
pub fn render_references(ledger: &[LedgerEntry]) -> String {
    let mut section = String::from("## References\n\n");
    for entry in ledger {
        let n = entry.citation_number;
        let label = if entry.title.trim().is_empty() {
            entry.url.clone()
        } else {
            entry.title.clone()
        };
        if entry.url.trim().is_empty() {
            section.push_str(&format!("<a id=\"ref-{n}\"></a>[{n}] {label}\n"));
        } else {
            section.push_str(&format!(
                "<a id=\"ref-{n}\"></a>[{n}] [{label}]({})\n",
                entry.url
            ));
        }
    }
    section
}

/// Produce the final report text: linkified draft plus references.
pub fn finalize_report(draft: &str, ledger: &[LedgerEntry]) -> String {
    let linkified = linkify_citations(draft, ledger);
    if ledger.is_empty() {
        return linkified.trim_end().to_owned();
    }
    format!("{}\n\n{}", linkified.trim_end(), render_references(ledger))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn entry(number: u32, title: &str, url: &str) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            job_id: Uuid::nil(),
            source_hash: format!("hash-{number}"),
            citation_number: number,
            title: title.to_owned(),
            url: url.to_owned(),
            accessed_at: Utc::now(),
        }
    }

    #[test]
    fn test_linkify_known_markers() {
        let ledger = vec![entry(1, "A", "https://a.example")];
        assert_eq!(
            linkify_citations("finding [1] holds", &ledger),
            "finding [1](#ref-1) holds"
        );
    }

    #[test]
    fn test_linkify_leaves_unknown_numbers() {
        let ledger = vec![entry(1, "A", "https://a.example")];
        assert_eq!(
            linkify_citations("see [1] and [7]", &ledger),
            "see [1](#ref-1) and [7]"
        );
    }

    #[test]
    fn test_linkify_skips_existing_links() {
        let ledger = vec![entry(2, "B", "https://b.example")];
        let text = "already [2](#ref-2) linked, bare [2] not";
        assert_eq!(
            linkify_citations(text, &ledger),
            "already [2](#ref-2) linked, bare [2](#ref-2) not"
        );
    }

    #[test]
    fn test_references_anchors_and_labels() {
        let ledger = vec![
            entry(1, "Title A", "https://a.example"),
            entry(2, "", "https://b.example"),
        ];
        let refs = render_references(&ledger);
        assert!(refs.starts_with("## References"));
        assert!(refs.contains("<a id=\"ref-1\"></a>[1] [Title A](https://a.example)"));
        assert!(refs.contains("<a id=\"ref-2\"></a>[2] [https://b.example](https://b.example)"));
    }

    #[test]
    fn test_finalize_appends_references() {
        let ledger = vec![entry(1, "A", "https://a.example")];
        let report = finalize_report("body [1]\n", &ledger);
        assert!(report.contains("body [1](#ref-1)"));
        assert!(report.contains("## References"));
    }

    #[test]
    fn test_finalize_without_ledger_has_no_references() {
        let report = finalize_report("plain body", &[]);
        assert_eq!(report, "plain body");
    }
}
