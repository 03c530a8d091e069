//! Approximate token accounting.
//!
//! Sizing is deliberately rough: a word-count heuristic with generous safety
//! margins. Consumers treat every budget as a soft target and handle upstream
//! "too many tokens" errors by shrinking and retrying.

/// Sentinel appended to text that was truncated to fit a token ceiling.
pub const TRUNCATION_SENTINEL: &str = " …";

/// Token ceiling of the embedding endpoint.
pub const EMBED_TOKEN_CEILING: usize = 512;

/// Estimate the token count of a text: word count × 1.3, rounded up.
pub fn estimate_tokens(text: &str) -> u32 {
    let words = text.split_whitespace().count();
    let scaled = words.saturating_mul(13).saturating_add(9).saturating_div(10);
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

/// Clamp text for the embedding endpoint: target 512 × 0.8 tokens, shrinking
/// by 10% per iteration until the estimate fits. Truncation is marked with a
/// trailing ellipsis sentinel.
pub fn clamp_for_embedding(text: &str) -> String {
    clamp_to_tokens(text, EMBED_TOKEN_CEILING.saturating_mul(8).saturating_div(10))
}

/// Clamp text to an approximate token ceiling.
pub fn clamp_to_tokens(text: &str, ceiling: usize) -> String {
    let ceiling = u32::try_from(ceiling).unwrap_or(u32::MAX);
    if estimate_tokens(text) <= ceiling {
        return text.to_owned();
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    let mut keep = words.len();
    loop {
        // Shrink by 10% each round; always make progress on tiny inputs.
        keep = keep.saturating_mul(9).saturating_div(10);
        if keep == 0 {
            return TRUNCATION_SENTINEL.trim_start().to_owned();
        }
        let candidate = words.get(..keep).unwrap_or(&[]).join(" ");
        if estimate_tokens(&candidate) <= ceiling {
            return format!("{candidate}{TRUNCATION_SENTINEL}");
        }
    }
}

/// Shrink a text by 10% of its words, for embed retry loops.
pub fn shrink_by_tenth(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let keep = words.len().saturating_mul(9).saturating_div(10);
    if keep == 0 || keep == words.len() {
        // Force progress even when rounding would keep everything.
        let keep = words.len().saturating_sub(1);
        if keep == 0 {
            return String::new();
        }
        return format!(
            "{}{TRUNCATION_SENTINEL}",
            words.get(..keep).unwrap_or(&[]).join(" ")
        );
    }
    format!(
        "{}{TRUNCATION_SENTINEL}",
        words.get(..keep).unwrap_or(&[]).join(" ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_scales_words() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("one"), 2); // ceil(1 × 1.3)
        assert_eq!(estimate_tokens("a b c d e f g h i j"), 13);
    }

    #[test]
    fn test_clamp_leaves_short_text_alone() {
        let text = "short text stays intact";
        assert_eq!(clamp_for_embedding(text), text);
    }

    #[test]
    fn test_clamp_truncates_and_marks() {
        let text = "word ".repeat(2000);
        let clamped = clamp_for_embedding(&text);
        assert!(clamped.ends_with(TRUNCATION_SENTINEL.trim_start()));
        assert!(
            estimate_tokens(&clamped)
                <= u32::try_from(EMBED_TOKEN_CEILING).unwrap_or(u32::MAX)
        );
    }

    #[test]
    fn test_shrink_by_tenth_always_progresses() {
        let shrunk = shrink_by_tenth("a b c");
        assert!(shrunk.starts_with("a b"));
        assert!(!shrunk.contains('c'));
        assert_eq!(shrink_by_tenth(""), "");
    }
}
