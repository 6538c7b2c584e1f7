//! Engine configuration.
//!
//! Everything tunable lives here with serde defaults, so a config file can
//! override any subset and the rest falls back to the documented values.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Routing thresholds and switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Below this complexity a simple-shaped plan takes the fast path.
    pub simple_complexity_threshold: f64,
    /// Above this many subtasks the supervisor strategy takes over.
    pub supervisor_subtask_threshold: usize,
    /// Consult the strategy recommender before planning.
    pub continuous_learning: bool,
    /// Fall back to normal routing when a requested template fails.
    pub template_fallback_enabled: bool,
    /// Domains whose pages need a real browser (JS-required).
    pub browser_required_domains: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            simple_complexity_threshold: 0.3,
            supervisor_subtask_threshold: 5,
            continuous_learning: false,
            template_fallback_enabled: true,
            browser_required_domains: vec![
                "x.com".to_string(),
                "twitter.com".to_string(),
                "instagram.com".to_string(),
                "linkedin.com".to_string(),
            ],
        }
    }
}

/// Approval gate policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Require approval even when the request does not ask for it.
    pub require_by_default: bool,
    /// Complexity at or above which approval is requested.
    pub complexity_threshold: f64,
    /// Tools whose presence in a plan forces approval.
    pub dangerous_tools: Vec<String>,
    /// Default wait for the `human-approval-<id>` signal.
    pub timeout_secs: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            require_by_default: false,
            complexity_threshold: 0.7,
            dangerous_tools: vec![
                "code_execution".to_string(),
                "file_write".to_string(),
                "shell".to_string(),
            ],
            timeout_secs: 30 * 60,
        }
    }
}

/// Human-in-the-loop research plan review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Default wait for the `research-plan-approved-<id>` signal.
    pub timeout_secs: u64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15 * 60,
        }
    }
}

/// Plan-based token estimation and per-agent budget derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Base token estimate per planned subtask.
    pub per_subtask_estimate: u64,
    /// Multiplier above `complex_threshold`.
    pub complex_multiplier: f64,
    /// Multiplier above `elevated_threshold`.
    pub elevated_multiplier: f64,
    pub elevated_threshold: f64,
    pub complex_threshold: f64,
    /// Hard cap on the derived per-agent budget.
    pub agent_max_cap: Option<u64>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            per_subtask_estimate: 2_000,
            complex_multiplier: 2.5,
            elevated_multiplier: 1.5,
            elevated_threshold: 0.4,
            complex_threshold: 0.7,
            agent_max_cap: None,
        }
    }
}

/// Provider/tier-keyed request pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateControlConfig {
    pub enabled: bool,
    /// Base delay per provider, milliseconds.
    pub provider_delay_ms: HashMap<String, u64>,
    /// Multiplier per model tier.
    pub tier_multipliers: HashMap<String, f64>,
    /// Delay for providers not in the table.
    pub default_delay_ms: u64,
}

impl Default for RateControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider_delay_ms: HashMap::from([
                ("openai".to_string(), 200),
                ("anthropic".to_string(), 150),
                ("deepseek".to_string(), 400),
                ("google".to_string(), 250),
            ]),
            tier_multipliers: HashMap::from([
                ("small".to_string(), 0.5),
                ("medium".to_string(), 1.0),
                ("large".to_string(), 2.0),
            ]),
            default_delay_ms: 100,
        }
    }
}

/// Sliding-window history compression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Compress when the history estimate exceeds
    /// `budget_agent_max * trigger_ratio`.
    pub trigger_ratio: f64,
    /// Compress down to `budget_agent_max * target_ratio`.
    pub target_ratio: f64,
    /// Oldest messages kept verbatim ahead of the summary.
    pub primers_count: usize,
    /// Newest messages kept verbatim after the summary.
    pub recents_count: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            trigger_ratio: 0.75,
            target_ratio: 0.375,
            primers_count: 2,
            recents_count: 6,
        }
    }
}

/// Shared bounds for the reason-act-observe loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    pub max_iterations: usize,
    /// Browser loops run longer; unified agent per iteration.
    pub browser_max_iterations: usize,
    /// Observations kept before the oldest collapse into a summary entry.
    pub observation_window: usize,
    /// Per-observation character cap in the LLM context.
    pub observation_cap_chars: usize,
    pub max_retries_per_task: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            browser_max_iterations: 15,
            observation_window: 12,
            observation_cap_chars: 4_000,
            max_retries_per_task: 3,
        }
    }
}

/// Post-synthesis reflection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionConfig {
    pub enabled: bool,
    /// Re-synthesize below this evaluation score.
    pub confidence_threshold: f64,
    pub max_retries: u32,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            confidence_threshold: 0.7,
            max_retries: 2,
        }
    }
}

/// Citation pipeline limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationConfig {
    pub max_per_domain: usize,
    pub max_citations: usize,
    /// Snippets shorter than this fall back to content/title.
    pub min_snippet_chars: usize,
    pub max_snippet_chars: usize,
    /// Optional path to a credibility YAML overriding the built-in table.
    pub credibility_config_path: Option<String>,
}

impl Default for CitationConfig {
    fn default() -> Self {
        Self {
            max_per_domain: 3,
            max_citations: 200,
            min_snippet_chars: 30,
            max_snippet_chars: 500,
            credibility_config_path: None,
        }
    }
}

/// Peer-to-peer topic rendezvous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2pConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 120,
            initial_backoff_secs: 1,
            max_backoff_secs: 30,
        }
    }
}

/// One cognitive-strategy downgrade rule: below `min_budget` tokens,
/// `strategy` degrades to `fallback`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationRule {
    pub strategy: String,
    pub min_budget: u64,
    pub fallback: String,
}

/// Budget-based cognitive strategy degradation table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationConfig {
    pub rules: Vec<DegradationRule>,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            rules: vec![
                DegradationRule {
                    strategy: "tree_of_thoughts".to_string(),
                    min_budget: 20_000,
                    fallback: "react".to_string(),
                },
                DegradationRule {
                    strategy: "debate".to_string(),
                    min_budget: 15_000,
                    fallback: "react".to_string(),
                },
                DegradationRule {
                    strategy: "react".to_string(),
                    min_budget: 5_000,
                    fallback: "chain_of_thought".to_string(),
                },
                DegradationRule {
                    strategy: "chain_of_thought".to_string(),
                    min_budget: 1_000,
                    fallback: "direct".to_string(),
                },
            ],
        }
    }
}

impl DegradationConfig {
    /// Resolve the strategy to run under `budget`, following the table until
    /// the budget clears the rule (or the chain bottoms out).
    pub fn resolve(&self, strategy: &str, budget: u64) -> String {
        let mut current = strategy.to_string();
        // Bounded by table size; each hop must move to a different strategy.
        for _ in 0..=self.rules.len() {
            let Some(rule) = self.rules.iter().find(|r| r.strategy == current) else {
                return current;
            };
            if budget >= rule.min_budget || rule.fallback == current {
                return current;
            }
            current = rule.fallback.clone();
        }
        current
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub routing: RoutingConfig,
    pub approval: ApprovalConfig,
    pub review: ReviewConfig,
    pub budget: BudgetConfig,
    pub rate: RateControlConfig,
    pub compression: CompressionConfig,
    pub loops: LoopConfig,
    pub reflection: ReflectionConfig,
    pub citations: CitationConfig,
    pub p2p: P2pConfig,
    pub degradation: DegradationConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"p2p": {"enabled": false, "timeout_secs": 5, "initial_backoff_secs": 1, "max_backoff_secs": 2}}"#)
                .unwrap();
        assert!(!config.p2p.enabled);
        assert_eq!(config.citations.max_per_domain, 3);
        assert_eq!(config.approval.timeout_secs, 1800);
    }

    #[test]
    fn degradation_follows_chain_until_affordable() {
        let table = DegradationConfig::default();
        assert_eq!(table.resolve("tree_of_thoughts", 50_000), "tree_of_thoughts");
        assert_eq!(table.resolve("tree_of_thoughts", 10_000), "react");
        assert_eq!(table.resolve("tree_of_thoughts", 2_000), "chain_of_thought");
        assert_eq!(table.resolve("tree_of_thoughts", 100), "direct");
        // Unknown strategies pass through.
        assert_eq!(table.resolve("swarm", 1), "swarm");
    }
}
