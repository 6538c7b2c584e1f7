//! Model pricing and cost calculation.

/// Pricing per 1 million tokens (USD).
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub cost_per_1m_input: f64,
    pub cost_per_1m_output: f64,
}

/// Get pricing for a model by API name.
/// Matches on prefixes so versioned names resolve to their family.
pub fn get_pricing(model_name: &str) -> Option<ModelPricing> {
    // OpenAI
    if model_name.starts_with("gpt-5-pro") {
        return Some(ModelPricing {
            cost_per_1m_input: 10.0,
            cost_per_1m_output: 40.0,
        });
    }
    if model_name.starts_with("gpt-5-mini") {
        return Some(ModelPricing {
            cost_per_1m_input: 0.4,
            cost_per_1m_output: 1.6,
        });
    }
    if model_name.starts_with("gpt-5-nano") {
        return Some(ModelPricing {
            cost_per_1m_input: 0.1,
            cost_per_1m_output: 0.4,
        });
    }
    if model_name.starts_with("gpt-5") {
        return Some(ModelPricing {
            cost_per_1m_input: 2.0,
            cost_per_1m_output: 8.0,
        });
    }
    if model_name.starts_with("o4-mini") || model_name.starts_with("o3-mini") {
        return Some(ModelPricing {
            cost_per_1m_input: 1.1,
            cost_per_1m_output: 4.4,
        });
    }
    if model_name.starts_with("o3") {
        return Some(ModelPricing {
            cost_per_1m_input: 2.0,
            cost_per_1m_output: 8.0,
        });
    }

    // Anthropic
    if model_name.starts_with("claude-opus-4") {
        return Some(ModelPricing {
            cost_per_1m_input: 15.0,
            cost_per_1m_output: 75.0,
        });
    }
    if model_name.starts_with("claude-sonnet-4") {
        return Some(ModelPricing {
            cost_per_1m_input: 3.0,
            cost_per_1m_output: 15.0,
        });
    }
    if model_name.starts_with("claude-haiku-4") {
        return Some(ModelPricing {
            cost_per_1m_input: 0.8,
            cost_per_1m_output: 4.0,
        });
    }

    // DeepSeek
    if model_name.starts_with("deepseek-reasoner") {
        return Some(ModelPricing {
            cost_per_1m_input: 0.55,
            cost_per_1m_output: 2.19,
        });
    }
    if model_name.starts_with("deepseek") {
        return Some(ModelPricing {
            cost_per_1m_input: 0.27,
            cost_per_1m_output: 1.10,
        });
    }

    None
}

/// Detect the provider from a model name.
pub fn detect_provider(model_name: &str) -> Option<&'static str> {
    if model_name.starts_with("gpt-")
        || model_name.starts_with("o3")
        || model_name.starts_with("o4")
    {
        return Some("openai");
    }
    if model_name.starts_with("claude") {
        return Some("anthropic");
    }
    if model_name.starts_with("deepseek") {
        return Some("deepseek");
    }
    if model_name.starts_with("gemini") {
        return Some("google");
    }
    None
}

/// Priority-one model for a tier, used when pricing must proceed without an
/// explicit model name.
pub fn priority_model_for_tier(tier: &str) -> &'static str {
    match tier {
        "small" => "claude-haiku-4",
        "large" => "claude-opus-4",
        _ => "claude-sonnet-4",
    }
}

/// Resolve a model name for pricing: the explicit name when present, else
/// the tier's priority-one model (tier defaults to medium).
pub fn resolve_model<'a>(model_name: &'a str, tier: Option<&str>) -> &'a str {
    if !model_name.is_empty() {
        return model_name;
    }
    priority_model_for_tier(tier.unwrap_or("medium"))
}

/// Cost in USD for an input/output token split. Unknown models cost 0.
pub fn cost_for_split(model_name: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let Some(pricing) = get_pricing(model_name) else {
        return 0.0;
    };
    (input_tokens as f64 / 1_000_000.0) * pricing.cost_per_1m_input
        + (output_tokens as f64 / 1_000_000.0) * pricing.cost_per_1m_output
}

/// Cost in USD for a bare total, split 60/40 input/output.
pub fn cost_for_tokens(model_name: &str, tokens: u64) -> f64 {
    let input = tokens * 6 / 10;
    cost_for_split(model_name, input, tokens - input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pricing_anthropic_sonnet() {
        let pricing = get_pricing("claude-sonnet-4-20250514").unwrap();
        assert_eq!(pricing.cost_per_1m_input, 3.0);
        assert_eq!(pricing.cost_per_1m_output, 15.0);
    }

    #[test]
    fn unknown_models_cost_nothing() {
        assert!(get_pricing("mystery-model").is_none());
        assert_eq!(cost_for_split("mystery-model", 1000, 1000), 0.0);
    }

    #[test]
    fn cost_for_split_sonnet() {
        // 1000 input + 500 output = 0.003 + 0.0075
        let cost = cost_for_split("claude-sonnet-4", 1000, 500);
        assert!((cost - 0.0105).abs() < 1e-9);
    }

    #[test]
    fn cost_for_tokens_uses_sixty_forty_split() {
        let direct = cost_for_split("claude-sonnet-4", 600, 400);
        assert!((cost_for_tokens("claude-sonnet-4", 1000) - direct).abs() < 1e-9);
    }

    #[test]
    fn empty_model_resolves_by_tier() {
        assert_eq!(resolve_model("", Some("small")), "claude-haiku-4");
        assert_eq!(resolve_model("", None), "claude-sonnet-4");
        assert_eq!(resolve_model("gpt-5", Some("small")), "gpt-5");
    }

    #[test]
    fn provider_detection() {
        assert_eq!(detect_provider("claude-sonnet-4"), Some("anthropic"));
        assert_eq!(detect_provider("gpt-5-mini"), Some("openai"));
        assert_eq!(detect_provider("deepseek-chat"), Some("deepseek"));
        assert_eq!(detect_provider("unknown"), None);
    }
}
