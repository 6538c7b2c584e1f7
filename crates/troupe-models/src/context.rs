//! Typed request context.
//!
//! Downstream LLM and tool activities consume unstructured hints, but the
//! engine itself reads a small set of recognized keys. Those are grouped into
//! typed envelopes here; everything unrecognized flows through the flattened
//! `hints` map untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Routing-related hints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingHints {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub force_research: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub force_p2p: bool,
    /// Pre-assigned agent role; bypasses LLM decomposition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub role_auto_detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_fallback_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub research_areas: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub official_domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exact_queries: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disambiguation_terms: Vec<String>,
}

impl RoutingHints {
    /// Template name/version requested via context keys, if any.
    pub fn template_request(&self) -> Option<(&str, Option<&str>)> {
        self.template
            .as_deref()
            .or(self.template_name.as_deref())
            .map(|name| (name, self.template_version.as_deref()))
    }
}

/// Token-budget hints, written by the router after preflight.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_remaining: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_agent_max: Option<u64>,
    /// Caller-provided per-agent cap; clamps the derived `budget_agent_max`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_budget_per_agent: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_budget_usd: Option<f64>,
}

/// History-compression hints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompressionHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primers_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recents_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_trigger_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_target_ratio: Option<f64>,
    /// Summary of compressed-away history, stashed for downstream agents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_summary: Option<String>,
}

/// Model/provider selection hints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_override: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_tier: Option<String>,
}

impl ModelHints {
    /// Explicit provider hint, checked in declaration order.
    pub fn provider_hint(&self) -> Option<&str> {
        self.provider_override
            .as_deref()
            .or(self.provider.as_deref())
            .or(self.llm_provider.as_deref())
    }
}

/// Review/approval hints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewHints {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub require_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_approval: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_timeout: Option<u64>,
}

/// Verification hints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationHints {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub enable_verification: bool,
}

/// Per-request context: typed envelopes for the recognized key families plus
/// an open map for everything downstream activities may want.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskContext {
    #[serde(flatten)]
    pub routing: RoutingHints,
    #[serde(flatten)]
    pub budget: BudgetHints,
    #[serde(flatten)]
    pub compression: CompressionHints,
    #[serde(flatten)]
    pub model: ModelHints,
    #[serde(flatten)]
    pub review: ReviewHints,
    #[serde(flatten)]
    pub verification: VerificationHints,
    #[serde(flatten)]
    pub hints: Map<String, Value>,
}

impl TaskContext {
    /// Serialize the whole context (typed keys and hints) into one JSON map,
    /// the shape downstream activities consume.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn hint(&self, key: &str) -> Option<&Value> {
        self.hints.get(key)
    }

    pub fn set_hint(&mut self, key: impl Into<String>, value: Value) {
        self.hints.insert(key.into(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognized_keys_land_in_hints() {
        let ctx: TaskContext = serde_json::from_value(serde_json::json!({
            "force_p2p": true,
            "model_tier": "small",
            "synthesis_style": "comprehensive",
        }))
        .unwrap();
        assert!(ctx.routing.force_p2p);
        assert_eq!(ctx.model.model_tier.as_deref(), Some("small"));
        assert_eq!(
            ctx.hint("synthesis_style").and_then(Value::as_str),
            Some("comprehensive")
        );
    }

    #[test]
    fn round_trip_preserves_hints() {
        let mut ctx = TaskContext::default();
        ctx.routing.force_research = true;
        ctx.set_hint("custom_key", serde_json::json!({"a": 1}));
        let value = ctx.to_value();
        let back: TaskContext = serde_json::from_value(value).unwrap();
        assert!(back.routing.force_research);
        assert_eq!(back.hint("custom_key"), ctx.hint("custom_key"));
    }

    #[test]
    fn provider_hint_precedence() {
        let hints = ModelHints {
            llm_provider: Some("openai".into()),
            provider: Some("anthropic".into()),
            ..Default::default()
        };
        assert_eq!(hints.provider_hint(), Some("anthropic"));
    }
}
