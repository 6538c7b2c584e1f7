//! Agent execution records and token-usage accounting.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One tool invocation made by an agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolExecution {
    pub tool: String,
    pub success: bool,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub input_params: Map<String, Value>,
}

/// Outcome of a single agent activity call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentExecutionResult {
    pub agent_id: String,
    #[serde(default)]
    pub response: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub model_used: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(default)]
    pub tool_executions: Vec<ToolExecution>,
    #[serde(default)]
    pub role: String,
}

impl AgentExecutionResult {
    pub fn used_tool(&self, name: &str) -> bool {
        self.tools_used.iter().any(|t| t == name)
    }

    /// Input/output split, falling back to a 60/40 split of the total when
    /// the activity only reported `tokens_used`.
    pub fn token_split(&self) -> (u64, u64) {
        if self.input_tokens > 0 || self.output_tokens > 0 {
            (self.input_tokens, self.output_tokens)
        } else {
            let input = self.tokens_used * 6 / 10;
            (input, self.tokens_used - input)
        }
    }
}

/// Per-agent usage row in result metadata; synthesis gets its own row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentUsage {
    pub agent_id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub duration_ms: u64,
}

/// Which engine phase a usage record belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UsagePhase {
    Planning,
    Agent,
    Synthesis,
    ReactReason,
    ReactAction,
    ReactSynth,
    ReflectionSynth,
}

impl UsagePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Agent => "agent",
            Self::Synthesis => "synthesis",
            Self::ReactReason => "react_reason",
            Self::ReactAction => "react_action",
            Self::ReactSynth => "react_synth",
            Self::ReflectionSynth => "reflection_synth",
        }
    }
}

/// One billing record handed to the usage store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsageRecord {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub phase: Option<UsagePhase>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_split_prefers_explicit_counts() {
        let result = AgentExecutionResult {
            input_tokens: 70,
            output_tokens: 30,
            tokens_used: 100,
            ..Default::default()
        };
        assert_eq!(result.token_split(), (70, 30));
    }

    #[test]
    fn token_split_falls_back_to_sixty_forty() {
        let result = AgentExecutionResult {
            tokens_used: 100,
            ..Default::default()
        };
        assert_eq!(result.token_split(), (60, 40));
    }

    #[test]
    fn usage_phase_wire_names() {
        assert_eq!(UsagePhase::ReactReason.as_str(), "react_reason");
        assert_eq!(
            serde_json::to_value(UsagePhase::ReflectionSynth).unwrap(),
            serde_json::json!("reflection_synth")
        );
    }
}
