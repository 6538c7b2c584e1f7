//! Citations derived from agent tool output.
//!
//! Citations are never user-supplied; the collector in the core engine
//! derives them from search/fetch tool executions and agent responses.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which tool family a citation was recovered from.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToolSource {
    #[serde(rename = "search")]
    Search,
    #[serde(rename = "fetch")]
    Fetch,
    #[default]
    #[serde(rename = "")]
    None,
}

/// A scored, normalized source reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    /// Normalized URL: lowercase scheme/host, no `www.`, no fragment, no
    /// tracking parameters, no trailing slash.
    pub url: String,
    #[serde(default)]
    pub title: String,
    /// Host with port and leading `www.` stripped.
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub source_type: String,
    #[serde(default)]
    pub tool_source: ToolSource,
    pub retrieved_at: DateTime<Utc>,
    #[serde(default)]
    pub published_date: Option<String>,
    /// All scores live in `[0, 1]`.
    #[serde(default)]
    pub relevance_score: f64,
    #[serde(default)]
    pub quality_score: f64,
    #[serde(default)]
    pub credibility_score: f64,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub snippet: String,
    /// 1-indexed id assigned by the fetch-only verification filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
}

impl Citation {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            source: String::new(),
            source_type: String::new(),
            tool_source: ToolSource::None,
            retrieved_at: Utc::now(),
            published_date: None,
            relevance_score: 0.0,
            quality_score: 0.0,
            credibility_score: 0.0,
            agent_id: String::new(),
            snippet: String::new(),
            id: None,
        }
    }

    /// Ranking key: quality weighted by credibility.
    pub fn rank_score(&self) -> f64 {
        self.quality_score * self.credibility_score
    }
}

/// Quality histogram over a citation set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QualityBuckets {
    /// quality < 0.3
    pub low: usize,
    /// 0.3 <= quality < 0.6
    pub medium: usize,
    /// quality >= 0.6
    pub high: usize,
}

/// Aggregate statistics computed after dedup/rank/limit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CitationStats {
    pub total: usize,
    pub unique_domains: usize,
    pub avg_quality: f64,
    pub avg_credibility: f64,
    /// unique_domains / total, 0 when empty.
    pub source_diversity: f64,
    pub quality_buckets: QualityBuckets,
    /// Up to ten most frequent domains, most frequent first.
    pub top_domains: Vec<(String, usize)>,
    /// URLs that collapsed during dedup.
    pub duplicate_urls: usize,
    pub per_agent: BTreeMap<String, usize>,
}
