//! Decomposition plans: the planner's output.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Coarse task classification from the planner.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskMode {
    #[default]
    Simple,
    Complex,
}

/// How the subtasks of a plan should be scheduled.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    #[default]
    Sequential,
    Parallel,
    Dag,
    Hybrid,
}

/// A single planned step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subtask {
    /// Unique within the plan.
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub task_type: String,
    /// Ids that must complete before this subtask starts.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Workspace topics this subtask appends to on completion.
    #[serde(default)]
    pub produces: Vec<String>,
    /// Workspace topics this subtask waits on before starting.
    #[serde(default)]
    pub consumes: Vec<String>,
    #[serde(default)]
    pub suggested_tools: Vec<String>,
    #[serde(default)]
    pub tool_parameters: Map<String, Value>,
    #[serde(default)]
    pub estimated_tokens: u64,
}

impl Subtask {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            ..Default::default()
        }
    }
}

/// Planning output: subtasks, strategy, and the planner's own usage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecompositionResult {
    #[serde(default)]
    pub mode: TaskMode,
    /// In `[0, 1]`; drives approval and routing thresholds.
    #[serde(default)]
    pub complexity_score: f64,
    #[serde(default)]
    pub execution_strategy: ExecutionStrategy,
    /// Non-empty and not `direct`/`decompose` overrides routing.
    #[serde(default)]
    pub cognitive_strategy: Option<String>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    /// Per-subtask role strings, parallel to `subtasks`.
    #[serde(default)]
    pub agent_types: Vec<String>,
    #[serde(default)]
    pub total_estimated_tokens: u64,
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
}

impl DecompositionResult {
    /// Single-subtask plan for a pre-assigned role, bypassing the planner.
    pub fn for_role(query: &str, role: &str, allowed_tools: Vec<String>) -> Self {
        let mut subtask = Subtask::new("task-1", query);
        subtask.task_type = role.to_string();
        subtask.suggested_tools = allowed_tools;
        Self {
            mode: TaskMode::Simple,
            complexity_score: 0.0,
            execution_strategy: ExecutionStrategy::Sequential,
            subtasks: vec![subtask],
            agent_types: vec![role.to_string()],
            ..Default::default()
        }
    }

    pub fn has_dependencies(&self) -> bool {
        self.subtasks.iter().any(|s| !s.dependencies.is_empty())
    }

    /// Cognitive strategy that should override routing, if any.
    pub fn cognitive_override(&self) -> Option<&str> {
        match self.cognitive_strategy.as_deref() {
            Some("") | Some("direct") | Some("decompose") | None => None,
            Some(strategy) => Some(strategy),
        }
    }

    /// Role for a subtask, falling back to `agent_types` by position.
    pub fn role_for(&self, index: usize) -> Option<&str> {
        self.agent_types.get(index).map(String::as_str).filter(|r| !r.is_empty())
    }

    /// All topics produced by some subtask in this plan.
    pub fn produced_topics(&self) -> HashSet<String> {
        self.subtasks
            .iter()
            .flat_map(|s| s.produces.iter().cloned())
            .collect()
    }

    /// Validate plan invariants: unique subtask ids, dependencies that exist,
    /// and an acyclic dependency relation.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for subtask in &self.subtasks {
            if subtask.id.is_empty() {
                return Err("subtask with empty id".to_string());
            }
            if !seen.insert(subtask.id.as_str()) {
                return Err(format!("duplicate subtask id: {}", subtask.id));
            }
        }
        for subtask in &self.subtasks {
            for dep in &subtask.dependencies {
                if !seen.contains(dep.as_str()) {
                    return Err(format!(
                        "subtask {} depends on unknown id {}",
                        subtask.id, dep
                    ));
                }
            }
        }
        if self.has_cycle() {
            return Err("dependency cycle detected".to_string());
        }
        Ok(())
    }

    fn has_cycle(&self) -> bool {
        // Iterative DFS with colors: 0 unvisited, 1 on stack, 2 done.
        let index: HashMap<&str, usize> = self
            .subtasks
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();
        let mut color = vec![0u8; self.subtasks.len()];

        fn visit(
            at: usize,
            subtasks: &[Subtask],
            index: &HashMap<&str, usize>,
            color: &mut [u8],
        ) -> bool {
            color[at] = 1;
            for dep in &subtasks[at].dependencies {
                if let Some(&next) = index.get(dep.as_str()) {
                    let c = color[next];
                    if c == 1 {
                        return true;
                    } else if c == 0 && visit(next, subtasks, index, color) {
                        return true;
                    }
                }
            }
            color[at] = 2;
            false
        }

        (0..self.subtasks.len())
            .any(|i| color[i] == 0 && visit(i, &self.subtasks, &index, &mut color))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_with(subtasks: Vec<Subtask>) -> DecompositionResult {
        DecompositionResult {
            subtasks,
            ..Default::default()
        }
    }

    #[test]
    fn validate_accepts_chain() {
        let mut b = Subtask::new("b", "second");
        b.dependencies = vec!["a".into()];
        let plan = plan_with(vec![Subtask::new("a", "first"), b]);
        assert!(plan.validate().is_ok());
        assert!(plan.has_dependencies());
    }

    #[test]
    fn validate_rejects_duplicate_ids() {
        let plan = plan_with(vec![Subtask::new("a", "x"), Subtask::new("a", "y")]);
        assert!(plan.validate().unwrap_err().contains("duplicate"));
    }

    #[test]
    fn validate_rejects_unknown_dependency() {
        let mut a = Subtask::new("a", "x");
        a.dependencies = vec!["ghost".into()];
        let plan = plan_with(vec![a]);
        assert!(plan.validate().unwrap_err().contains("unknown"));
    }

    #[test]
    fn validate_rejects_cycle() {
        let mut a = Subtask::new("a", "x");
        a.dependencies = vec!["b".into()];
        let mut b = Subtask::new("b", "y");
        b.dependencies = vec!["a".into()];
        let plan = plan_with(vec![a, b]);
        assert!(plan.validate().unwrap_err().contains("cycle"));
    }

    #[test]
    fn cognitive_override_ignores_trivial_values() {
        let mut plan = DecompositionResult::default();
        assert!(plan.cognitive_override().is_none());
        plan.cognitive_strategy = Some("direct".into());
        assert!(plan.cognitive_override().is_none());
        plan.cognitive_strategy = Some("react".into());
        assert_eq!(plan.cognitive_override(), Some("react"));
    }

    #[test]
    fn role_plan_has_single_subtask() {
        let plan =
            DecompositionResult::for_role("fetch the docs", "browser_use", vec!["browser".into()]);
        assert_eq!(plan.subtasks.len(), 1);
        assert_eq!(plan.agent_types, vec!["browser_use".to_string()]);
        assert_eq!(plan.subtasks[0].suggested_tools, vec!["browser".to_string()]);
    }
}
