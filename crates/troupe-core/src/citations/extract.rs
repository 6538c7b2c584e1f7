//! Citation extraction from tool outputs and agent responses.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use troupe_models::ToolSource;

/// A citation candidate before normalization and scoring.
#[derive(Debug, Clone, Default)]
pub struct RawCitation {
    pub url: String,
    pub title: String,
    pub snippet: String,
    /// Longer body used for snippet fallback.
    pub content: String,
    pub score: Option<f64>,
    pub published_date: Option<String>,
    pub tool_source: ToolSource,
    pub source_type: String,
}

/// Extract citation candidates from one tool execution's output.
pub fn extract_from_tool(tool: &str, output: &Value) -> Vec<RawCitation> {
    match tool {
        "web_search" => extract_search(output),
        "web_fetch" => extract_fetch(output),
        "web_subpage_fetch" | "web_crawl" => extract_crawl(output),
        _ => Vec::new(),
    }
}

/// Parse web_search output: a direct result list, a `{results: [...]}`
/// wrapper, or a JSON string of either shape.
fn extract_search(output: &Value) -> Vec<RawCitation> {
    let value = unwrap_json_string(output);
    let items = match value.as_ref() {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("results").and_then(Value::as_array) {
            Some(items) => items.as_slice(),
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    items
        .iter()
        .filter_map(|item| search_item(item))
        .collect()
}

fn search_item(item: &Value) -> Option<RawCitation> {
    let url = str_field(item, "url")?;
    let snippet = str_field(item, "snippet")
        .or_else(|| str_field(item, "text"))
        .unwrap_or_default();
    let tool_source = match str_field(item, "tool_source").as_deref() {
        Some("fetch") => ToolSource::Fetch,
        _ => ToolSource::Search,
    };
    Some(RawCitation {
        url,
        title: str_field(item, "title").unwrap_or_default(),
        content: snippet.clone(),
        snippet,
        score: item.get("score").and_then(Value::as_f64),
        published_date: str_field(item, "published_date"),
        tool_source,
        source_type: "web".to_string(),
    })
}

/// Parse web_fetch output: a single page or a `{pages: [...]}` batch.
/// Only pages with `success=true` are included.
fn extract_fetch(output: &Value) -> Vec<RawCitation> {
    let value = unwrap_json_string(output);
    let Value::Object(map) = value.as_ref() else {
        return Vec::new();
    };

    if let Some(pages) = map.get("pages").and_then(Value::as_array) {
        return pages.iter().filter_map(fetch_page).collect();
    }
    fetch_page(value.as_ref()).into_iter().collect()
}

fn fetch_page(page: &Value) -> Option<RawCitation> {
    if let Some(success) = page.get("success").and_then(Value::as_bool) {
        if !success {
            return None;
        }
    }
    let url = str_field(page, "url")?;
    let content = str_field(page, "content")
        .or_else(|| str_field(page, "markdown"))
        .or_else(|| str_field(page, "text"))
        .unwrap_or_default();
    Some(RawCitation {
        url,
        title: str_field(page, "title").unwrap_or_default(),
        snippet: content.clone(),
        content,
        score: None,
        published_date: str_field(page, "published_date"),
        tool_source: ToolSource::Fetch,
        source_type: "web".to_string(),
    })
}

static CRAWL_HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^#{1,2} (?:Main Page|Subpage \d+|Page \d+): (\S+)\s*$").expect("valid regex")
});

/// Parse crawl/subpage output: `metadata.urls` plus merged markdown split by
/// `# Main Page: <url>` / `## Subpage N: <url>` / `## Page N: <url>` headers.
fn extract_crawl(output: &Value) -> Vec<RawCitation> {
    let value = unwrap_json_string(output);
    let Value::Object(map) = value.as_ref() else {
        return Vec::new();
    };

    let content = str_field(value.as_ref(), "content")
        .or_else(|| str_field(value.as_ref(), "markdown"))
        .unwrap_or_default();

    let mut citations = Vec::new();
    let matches: Vec<_> = CRAWL_HEADER_RE.captures_iter(&content).collect();
    for (i, captures) in matches.iter().enumerate() {
        let whole = captures.get(0).expect("match 0");
        let url = captures.get(1).expect("url group").as_str().to_string();
        let section_start = whole.end();
        let section_end = matches
            .get(i + 1)
            .map(|next| next.get(0).expect("match 0").start())
            .unwrap_or(content.len());
        let body = content[section_start..section_end].trim();
        let title = body
            .lines()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("")
            .trim_start_matches('#')
            .trim()
            .to_string();
        citations.push(RawCitation {
            url,
            title,
            snippet: body.to_string(),
            content: body.to_string(),
            score: None,
            published_date: None,
            tool_source: ToolSource::Fetch,
            source_type: "web".to_string(),
        });
    }

    // Fall back to the listed URLs when the markdown carried no headers.
    if citations.is_empty() {
        if let Some(urls) = map
            .get("metadata")
            .and_then(|m| m.get("urls"))
            .and_then(Value::as_array)
        {
            for url in urls.iter().filter_map(Value::as_str) {
                citations.push(RawCitation {
                    url: url.to_string(),
                    tool_source: ToolSource::Fetch,
                    source_type: "web".to_string(),
                    ..Default::default()
                });
            }
        }
    }

    citations
}

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[^\s<>\x22']+").expect("valid regex"));

/// Recover citations from raw agent response text: a JSON array of
/// search-shaped results, else a plain URL scan.
pub fn extract_from_response(response: &str) -> Vec<RawCitation> {
    let trimmed = response.trim();
    if trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            let parsed = extract_search(&value);
            if !parsed.is_empty() {
                return parsed;
            }
        }
    }

    URL_RE
        .find_iter(response)
        .filter_map(|m| {
            let url = clean_scanned_url(m.as_str());
            (!url.is_empty()).then(|| RawCitation {
                url,
                tool_source: ToolSource::None,
                source_type: "web".to_string(),
                ..Default::default()
            })
        })
        .collect()
}

/// Trim trailing punctuation, tag residue, and non-ASCII suffixes from a
/// URL found in free text.
fn clean_scanned_url(raw: &str) -> String {
    let mut url = raw.to_string();

    // Escaped/encoded closing-tag residue first, then plain tags.
    for residue in ["%3c/url%3e", "%3C/url%3E", "&lt;/url&gt;", "</url>"] {
        if let Some(stripped) = strip_suffix_ignore_case(&url, residue) {
            url = stripped;
        }
    }

    // Trailing non-ASCII runs (e.g. CJK text glued to the URL).
    while url
        .chars()
        .next_back()
        .is_some_and(|c| !c.is_ascii())
    {
        url.pop();
    }

    while url
        .chars()
        .next_back()
        .is_some_and(|c| ".,;:!?)]}\'\"".contains(c))
    {
        url.pop();
    }

    url
}

fn strip_suffix_ignore_case(value: &str, suffix: &str) -> Option<String> {
    let split = value.len().checked_sub(suffix.len())?;
    if !value.is_char_boundary(split) {
        return None;
    }
    let (head, tail) = value.split_at(split);
    tail.eq_ignore_ascii_case(suffix).then(|| head.to_string())
}

fn unwrap_json_string(value: &Value) -> std::borrow::Cow<'_, Value> {
    if let Value::String(text) = value {
        if let Ok(parsed) = serde_json::from_str::<Value>(text) {
            return std::borrow::Cow::Owned(parsed);
        }
    }
    std::borrow::Cow::Borrowed(value)
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn search_direct_list() {
        let output = json!([
            {"url": "https://a.com/1", "title": "A", "text": "alpha", "score": 0.9},
            {"url": "https://b.com/2", "snippet": "beta"},
        ]);
        let raw = extract_from_tool("web_search", &output);
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[0].score, Some(0.9));
        assert_eq!(raw[1].snippet, "beta");
        assert_eq!(raw[0].tool_source, ToolSource::Search);
    }

    #[test]
    fn search_wrapped_and_stringified() {
        let wrapped = json!({"results": [{"url": "https://a.com", "title": "A"}]});
        assert_eq!(extract_from_tool("web_search", &wrapped).len(), 1);

        let stringified = json!(r#"{"results": [{"url": "https://a.com"}]}"#);
        assert_eq!(extract_from_tool("web_search", &stringified).len(), 1);
    }

    #[test]
    fn fetch_batch_keeps_only_successes() {
        let output = json!({
            "pages": [
                {"url": "https://ok.com", "title": "OK", "content": "body", "success": true},
                {"url": "https://broken.com", "success": false},
            ],
            "succeeded": 1,
            "failed": 1,
        });
        let raw = extract_from_tool("web_fetch", &output);
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].url, "https://ok.com");
        assert_eq!(raw[0].tool_source, ToolSource::Fetch);
    }

    #[test]
    fn fetch_single_page() {
        let output = json!({"url": "https://one.com", "title": "One", "markdown": "# One"});
        let raw = extract_from_tool("web_fetch", &output);
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].content, "# One");
    }

    #[test]
    fn crawl_splits_on_headers() {
        let content = "\
# Main Page: https://site.com\nWelcome text here.\n\n\
## Subpage 1: https://site.com/docs\nDocs intro line.\nMore docs.\n\n\
## Page 2: https://site.com/blog\nBlog line.\n";
        let output = json!({
            "content": content,
            "metadata": {"urls": ["https://site.com", "https://site.com/docs", "https://site.com/blog"]},
        });
        let raw = extract_from_tool("web_crawl", &output);
        assert_eq!(raw.len(), 3);
        assert_eq!(raw[0].url, "https://site.com");
        assert_eq!(raw[0].title, "Welcome text here.");
        assert_eq!(raw[1].url, "https://site.com/docs");
        assert!(raw[1].snippet.contains("More docs."));
    }

    #[test]
    fn response_fallback_parses_json_array() {
        let response = r#"[{"url": "https://a.com", "title": "A", "text": "alpha"}]"#;
        let raw = extract_from_response(response);
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].title, "A");
    }

    #[test]
    fn response_fallback_scans_urls() {
        let response = "See https://example.com/page. Also (https://other.com/x) and \
                        https://tagged.com/y</url> plus https://cjk.com/z漢字";
        let urls: Vec<String> = extract_from_response(response)
            .into_iter()
            .map(|r| r.url)
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/page",
                "https://other.com/x",
                "https://tagged.com/y",
                "https://cjk.com/z",
            ]
        );
    }
}
