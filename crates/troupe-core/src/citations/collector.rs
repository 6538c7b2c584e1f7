//! The citation pipeline: extract, filter, score, dedupe, diversify, rank.

use std::collections::HashMap;

use chrono::Utc;
use tracing::debug;

use troupe_models::{AgentExecutionResult, Citation, CitationStats, QualityBuckets};

use crate::citations::credibility::CredibilityConfig;
use crate::citations::extract::{self, RawCitation};
use crate::citations::{pollution, score, url};
use crate::config::CitationConfig;

pub struct CitationCollector {
    config: CitationConfig,
    credibility: CredibilityConfig,
}

impl CitationCollector {
    pub fn new(config: CitationConfig) -> Self {
        let credibility = match &config.credibility_config_path {
            Some(path) => CredibilityConfig::load_or_builtin(path),
            None => CredibilityConfig::builtin(),
        };
        Self {
            config,
            credibility,
        }
    }

    pub fn with_credibility(config: CitationConfig, credibility: CredibilityConfig) -> Self {
        Self {
            config,
            credibility,
        }
    }

    /// Run the full pipeline over a set of agent results.
    pub fn collect(&self, results: &[AgentExecutionResult]) -> (Vec<Citation>, CitationStats) {
        let mut candidates: Vec<(String, RawCitation)> = Vec::new();

        for result in results {
            let mut from_tools = Vec::new();
            for execution in result.tool_executions.iter().filter(|t| t.success) {
                from_tools.extend(extract::extract_from_tool(&execution.tool, &execution.output));
            }
            // Only reach into the response text when no tool yielded anything.
            if from_tools.is_empty() && !result.response.is_empty() {
                from_tools = extract::extract_from_response(&result.response);
            }
            for raw in from_tools {
                candidates.push((result.agent_id.clone(), raw));
            }
        }

        let mut citations = Vec::with_capacity(candidates.len());
        let now = Utc::now();
        for (agent_id, raw) in candidates {
            let Some(normalized) = url::normalize_url(&raw.url) else {
                continue;
            };
            if url::is_low_value_url(&normalized) {
                continue;
            }
            let source = url::extract_domain(&normalized).unwrap_or_default();

            let relevance = raw
                .score
                .unwrap_or_else(|| score::default_relevance(raw.tool_source))
                .clamp(0.0, 1.0);
            let recency = score::recency_score(raw.published_date.as_deref(), now);
            let snippet = pollution::select_snippet(
                &raw.snippet,
                &raw.content,
                &raw.title,
                &normalized,
                self.config.min_snippet_chars,
                self.config.max_snippet_chars,
            );
            let quality = score::quality_score(
                relevance,
                recency,
                raw.published_date.is_some(),
                !raw.title.is_empty(),
                !snippet.is_empty(),
            );

            citations.push(Citation {
                credibility_score: self.credibility.score_for(&source),
                url: normalized,
                title: raw.title,
                source,
                source_type: raw.source_type,
                tool_source: raw.tool_source,
                retrieved_at: now,
                published_date: raw.published_date,
                relevance_score: relevance,
                quality_score: quality,
                agent_id,
                snippet,
                id: None,
            });
        }

        let (mut deduped, duplicate_urls) = dedupe(citations);
        apply_domain_cap(&mut deduped, self.config.max_per_domain);

        // Stable sort keeps insertion order for rank ties.
        deduped.sort_by(|a, b| {
            b.rank_score()
                .partial_cmp(&a.rank_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        deduped.truncate(self.config.max_citations);

        let stats = compute_stats(&deduped, duplicate_urls);
        debug!(
            total = stats.total,
            unique_domains = stats.unique_domains,
            duplicates = duplicate_urls,
            "Collected citations"
        );
        (deduped, stats)
    }
}

/// Collapse duplicates by DOI key (preferred) or normalized URL.
///
/// Merges keep the maximum of each score and the first non-empty
/// title/snippet/published_date. Returns the deduped list and how many
/// entries collapsed.
fn dedupe(citations: Vec<Citation>) -> (Vec<Citation>, usize) {
    let mut by_key: HashMap<String, usize> = HashMap::new();
    let mut result: Vec<Citation> = Vec::with_capacity(citations.len());
    let mut duplicates = 0usize;

    for citation in citations {
        let key = url::doi_key(&citation.url).unwrap_or_else(|| citation.url.clone());
        match by_key.get(&key) {
            None => {
                by_key.insert(key, result.len());
                result.push(citation);
            }
            Some(&index) => {
                duplicates += 1;
                let kept = &mut result[index];
                kept.relevance_score = kept.relevance_score.max(citation.relevance_score);
                kept.quality_score = kept.quality_score.max(citation.quality_score);
                kept.credibility_score = kept.credibility_score.max(citation.credibility_score);
                if kept.title.is_empty() && !citation.title.is_empty() {
                    kept.title = citation.title;
                }
                if kept.snippet.is_empty() && !citation.snippet.is_empty() {
                    kept.snippet = citation.snippet;
                }
                if kept.published_date.is_none() && citation.published_date.is_some() {
                    kept.published_date = citation.published_date;
                }
            }
        }
    }

    (result, duplicates)
}

/// Enforce the per-domain diversity cap, keeping the best-ranked entries
/// within each domain (earlier wins ties).
fn apply_domain_cap(citations: &mut Vec<Citation>, max_per_domain: usize) {
    if max_per_domain == 0 {
        return;
    }
    let mut by_domain: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, citation) in citations.iter().enumerate() {
        by_domain
            .entry(citation.source.clone())
            .or_default()
            .push(index);
    }

    let mut dropped: Vec<usize> = Vec::new();
    for indices in by_domain.values() {
        if indices.len() <= max_per_domain {
            continue;
        }
        let mut ranked = indices.clone();
        ranked.sort_by(|&a, &b| {
            citations[b]
                .rank_score()
                .partial_cmp(&citations[a].rank_score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });
        dropped.extend(ranked.into_iter().skip(max_per_domain));
    }

    if dropped.is_empty() {
        return;
    }
    dropped.sort_unstable();
    for index in dropped.into_iter().rev() {
        citations.remove(index);
    }
}

fn compute_stats(citations: &[Citation], duplicate_urls: usize) -> CitationStats {
    if citations.is_empty() {
        return CitationStats {
            duplicate_urls,
            ..Default::default()
        };
    }

    let total = citations.len();
    let mut domain_counts: HashMap<&str, usize> = HashMap::new();
    let mut per_agent = std::collections::BTreeMap::new();
    let mut buckets = QualityBuckets::default();
    let mut quality_sum = 0.0;
    let mut credibility_sum = 0.0;

    for citation in citations {
        *domain_counts.entry(citation.source.as_str()).or_insert(0) += 1;
        *per_agent.entry(citation.agent_id.clone()).or_insert(0) += 1;
        quality_sum += citation.quality_score;
        credibility_sum += citation.credibility_score;
        if citation.quality_score < 0.3 {
            buckets.low += 1;
        } else if citation.quality_score < 0.6 {
            buckets.medium += 1;
        } else {
            buckets.high += 1;
        }
    }

    let mut top_domains: Vec<(String, usize)> = domain_counts
        .iter()
        .map(|(domain, count)| (domain.to_string(), *count))
        .collect();
    top_domains.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_domains.truncate(10);

    CitationStats {
        total,
        unique_domains: domain_counts.len(),
        avg_quality: quality_sum / total as f64,
        avg_credibility: credibility_sum / total as f64,
        source_diversity: domain_counts.len() as f64 / total as f64,
        quality_buckets: buckets,
        top_domains,
        duplicate_urls,
        per_agent,
    }
}

/// Keep only fetch-derived citations and assign 1-indexed ids, the shape the
/// verification flow consumes.
pub fn filter_fetch_only_and_assign_ids(citations: &[Citation]) -> Vec<Citation> {
    citations
        .iter()
        .filter(|c| c.tool_source == troupe_models::ToolSource::Fetch)
        .cloned()
        .enumerate()
        .map(|(index, mut citation)| {
            citation.id = Some(index as u32 + 1);
            citation
        })
        .collect()
}
