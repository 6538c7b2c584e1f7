//! Snippet pollution guard.
//!
//! Tool outputs occasionally leak agent scaffolding into what should be page
//! text: function-call residue, prompt templates, structured field dumps.
//! Polluted snippets are dropped and replaced from cleaner sources.

use once_cell::sync::Lazy;
use regex::Regex;

/// Unambiguous agent/scaffolding residue.
const STRONG_SIGNALS: &[&str] = &[
    "<function_call",
    "</function",
    "<tool_call",
    "</tool_call",
    "<invoke",
    "[tool_call]",
    "action input:",
    "i'll search for",
    "i will now search",
    "let me search",
    "based on the search results",
    "based on the tool output",
    "as an ai",
];

/// Phrases that only indicate pollution in combination.
const WEAK_SIGNALS: &[&str] = &[
    "search results",
    "the query",
    "tool output",
    "according to the results",
    "the following information",
    "here is the information",
];

/// Verbs that mark an extraction instruction, across the languages agents
/// commonly answer in.
const EXTRACTION_KEYWORDS: &[&str] = &[
    "extract", "retrieve", "scrape", "parse", "抽出", "提取", "추출",
];

/// Structured-dump field labels.
const STRUCTURED_FIELDS: &[&str] = &[
    "industry:",
    "website:",
    "founded:",
    "headquarters:",
    "employees:",
    "revenue:",
    "ceo:",
    "ticker:",
];

static JSON_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""[A-Za-z_][A-Za-z0-9_]*"\s*:"#).expect("valid regex"));

/// Whether a snippet carries LLM/tool scaffolding instead of page text.
pub fn contains_llm_signals(snippet: &str) -> bool {
    let lower = snippet.to_lowercase();

    if STRONG_SIGNALS.iter().any(|signal| lower.contains(signal)) {
        return true;
    }

    if JSON_KEY_RE.find_iter(snippet).count() >= 2 {
        return true;
    }

    let structured_count = STRUCTURED_FIELDS
        .iter()
        .filter(|field| lower.contains(*field))
        .count();
    if structured_count >= 2 {
        return true;
    }

    let weak_count = WEAK_SIGNALS
        .iter()
        .filter(|signal| lower.contains(*signal))
        .count();
    weak_count >= 2 && EXTRACTION_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Pick the best snippet for a citation.
///
/// Polluted or too-short candidates fall back to the page content, then to
/// title + URL. The result is capped at `max_chars` characters.
pub fn select_snippet(
    candidate: &str,
    content: &str,
    title: &str,
    url: &str,
    min_chars: usize,
    max_chars: usize,
) -> String {
    let candidate = candidate.trim();
    if !candidate.is_empty()
        && !contains_llm_signals(candidate)
        && candidate.chars().count() >= min_chars
    {
        return truncate_chars(candidate, max_chars);
    }

    let content = content.trim();
    if !content.is_empty()
        && !contains_llm_signals(content)
        && content.chars().count() >= min_chars
    {
        return truncate_chars(content, max_chars);
    }

    let fallback = if title.is_empty() {
        url.to_string()
    } else {
        format!("{title} ({url})")
    };
    truncate_chars(&fallback, max_chars)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_signals_are_dropped() {
        assert!(contains_llm_signals("<function_call name=\"web_search\">"));
        assert!(contains_llm_signals("Based on the search results, the company..."));
        assert!(!contains_llm_signals("The Amazon rainforest spans nine countries."));
    }

    #[test]
    fn json_key_density_is_dropped() {
        assert!(contains_llm_signals(r#"{"title": "X", "url": "https://x"}"#));
        assert!(!contains_llm_signals(r#"The "why": performance matters."#));
    }

    #[test]
    fn structured_field_dump_is_dropped() {
        assert!(contains_llm_signals("Industry: Software\nFounded: 2015\nCEO: J. Doe"));
        assert!(!contains_llm_signals("The CEO: a profile of leadership styles."));
    }

    #[test]
    fn weak_signals_need_pair_and_extraction_keyword() {
        // Two weak signals without an extraction keyword pass.
        assert!(!contains_llm_signals(
            "The search results page shows the query volume over time."
        ));
        // Two weak signals plus an extraction verb fail.
        assert!(contains_llm_signals(
            "Extract the tool output from the search results listed below."
        ));
    }

    #[test]
    fn multilingual_extraction_keywords() {
        assert!(contains_llm_signals(
            "search results から the query の情報を抽出してください"
        ));
    }

    #[test]
    fn snippet_falls_back_through_chain() {
        let snippet = select_snippet("short", "a much longer clean page content body here", "Title", "https://example.com", 30, 500);
        assert_eq!(snippet, "a much longer clean page content body here");

        let fallback = select_snippet("", "", "Title", "https://example.com", 30, 500);
        assert_eq!(fallback, "Title (https://example.com)");
    }

    #[test]
    fn snippet_is_capped() {
        let long = "x".repeat(600);
        let snippet = select_snippet(&long, "", "", "https://example.com", 30, 500);
        assert_eq!(snippet.chars().count(), 500);
    }
}
