//! Bounded reason-act-observe loop, shared by the ReAct and research
//! strategy family.

use std::collections::HashSet;
use std::collections::VecDeque;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use troupe_models::{
    AgentExecutionResult, DecompositionResult, Subtask, TaskInput, TaskResult, UsagePhase,
};
use troupe_telemetry::EventType;
use troupe_traits::{ActivityError, AgentExecutionRequest};

use crate::error::{EngineError, Result};
use crate::retry::with_retries;
use crate::runtime::{WorkflowCtx, checkpoints};
use crate::strategies::{StrategyKind, finalize_fleet_results};

/// Phrases that mark the reasoner declaring the task done.
const COMPLETION_PHRASES: &[&str] = &[
    "task complete",
    "problem solved",
    "found the answer",
    "successfully completed",
    "objective achieved",
    "goal reached",
    "finished",
    "done",
];

/// Phrases that let the loop stop early after a confident observation.
const HIGH_CONFIDENCE_PHRASES: &[&str] = &[
    "success",
    "correct",
    "solved",
    "answer is",
    "found",
    "comprehensive",
];

static URL_COUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[^\s<>\x22']+").expect("valid regex"));

/// The reasoner declared completion.
pub(crate) fn mentions_completion(reasoning: &str) -> bool {
    let lower = reasoning.to_lowercase();
    COMPLETION_PHRASES.iter().any(|p| lower.contains(p))
}

pub(crate) fn mentions_high_confidence(observation: &str) -> bool {
    let lower = observation.to_lowercase();
    HIGH_CONFIDENCE_PHRASES.iter().any(|p| lower.contains(p))
}

/// Two observations are "similar" when their lengths are within 2x of each
/// other and at least 70% of their longer-word vocabularies overlap.
pub(crate) fn observations_similar(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let ratio = a.len() as f64 / b.len() as f64;
    if !(0.5..=2.0).contains(&ratio) {
        return false;
    }

    let tokens = |text: &str| -> HashSet<String> {
        text.to_lowercase()
            .split_whitespace()
            .filter(|t| t.len() >= 4)
            .map(str::to_string)
            .collect()
    };
    let set_a = tokens(a);
    let set_b = tokens(b);
    if set_a.is_empty() || set_b.is_empty() {
        return false;
    }
    let overlap = set_a.intersection(&set_b).count();
    overlap as f64 / set_a.len().min(set_b.len()) as f64 >= 0.7
}

/// Citation stability: same non-zero URL count and near-identical length.
pub(crate) fn citations_stable(a: &str, b: &str) -> bool {
    let count_a = URL_COUNT_RE.find_iter(a).count();
    let count_b = URL_COUNT_RE.find_iter(b).count();
    if count_a == 0 || count_a != count_b {
        return false;
    }
    let ratio = a.len() as f64 / b.len().max(1) as f64;
    (0.8..=1.2).contains(&ratio)
}

/// Bounded log: the oldest entries beyond the window collapse into one
/// summary line.
pub(crate) struct WindowLog {
    entries: VecDeque<String>,
    window: usize,
    truncated: usize,
}

impl WindowLog {
    pub fn new(window: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            window: window.max(1),
            truncated: 0,
        }
    }

    pub fn push(&mut self, entry: String) {
        self.entries.push_back(entry);
        while self.entries.len() > self.window {
            self.entries.pop_front();
            self.truncated += 1;
        }
    }

    pub fn last(&self) -> Option<&str> {
        self.entries.back().map(String::as_str)
    }

    pub fn last_two(&self) -> Option<(&str, &str)> {
        let len = self.entries.len();
        if len < 2 {
            return None;
        }
        Some((self.entries[len - 2].as_str(), self.entries[len - 1].as_str()))
    }

    /// Entries for prompting, with the truncation summary first.
    pub fn render(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.entries.len() + 1);
        if self.truncated > 0 {
            out.push(format!("[{} older observations truncated]", self.truncated));
        }
        out.extend(self.entries.iter().cloned());
        out
    }
}

/// Run the reason-act-observe loop for one of the loop strategies.
pub async fn run_react(
    ctx: &WorkflowCtx,
    input: &TaskInput,
    kind: StrategyKind,
) -> Result<TaskResult> {
    ctx.emitter
        .emit(
            EventType::WorkflowStarted,
            format!("{} loop started", kind.name()),
        )
        .await;

    let config = &ctx.config.loops;
    let research = matches!(
        kind,
        StrategyKind::Research | StrategyKind::Scientific | StrategyKind::Exploratory
    );

    let mut thoughts = WindowLog::new(config.observation_window);
    let mut actions = WindowLog::new(config.observation_window);
    let mut observations = WindowLog::new(config.observation_window);
    let mut act_results: Vec<AgentExecutionResult> = Vec::new();

    for iteration in 1..=config.max_iterations {
        ctx.checkpoint(checkpoints::PRE_EXECUTION).await?;
        debug!(iteration, "Loop iteration");

        // REASON
        let reason_prompt = format!(
            "Task: {}\n\nObservations so far:\n{}\n\nIn 1-2 sentences, in the same \
             language as the task, name the single next action to take. Say \"search\" \
             if external information is needed.",
            input.query,
            observations.render().join("\n")
        );
        let reasoning = match call_agent(
            ctx,
            input,
            &format!("react-reason-{iteration}"),
            reason_prompt,
            Vec::new(),
            UsagePhase::ReactReason,
        )
        .await?
        {
            Some(result) if result.success => result.response,
            _ => {
                warn!(iteration, "Reasoning step failed, ending loop");
                break;
            }
        };
        ctx.emitter
            .emit_agent(EventType::AgentThinking, "react", reasoning.clone())
            .await;
        thoughts.push(reasoning.clone());

        if mentions_completion(&reasoning) {
            info!(iteration, "Reasoner declared completion");
            break;
        }

        // ACT
        let mut suggested_tools = input.suggested_tools.clone();
        if research || reasoning.to_lowercase().contains("search") {
            if !suggested_tools.iter().any(|t| t == "web_search") {
                suggested_tools.insert(0, "web_search".to_string());
            }
        }
        let act_prompt = format!(
            "Task: {}\n\nNext action: {}\n\nPerform exactly this one atomic action and \
             report the result, in the same language as the task. Do not include a \
             \"## Sources\" section; sources are appended later.",
            input.query, reasoning
        );
        let act_result = call_agent(
            ctx,
            input,
            &format!("react-act-{iteration}"),
            act_prompt,
            suggested_tools,
            UsagePhase::ReactAction,
        )
        .await?;

        let Some(act_result) = act_result else {
            continue;
        };
        if act_result.response.trim().is_empty() {
            debug!(iteration, "Empty action response skipped");
            continue;
        }

        actions.push(act_result.response.clone());

        // OBSERVE
        let observation: String = format!("Action result: {}", act_result.response)
            .chars()
            .take(config.observation_cap_chars)
            .collect();
        observations.push(observation);
        act_results.push(act_result);

        // Early stop heuristics only make sense with some history.
        if iteration >= 2 {
            if let Some(last) = observations.last() {
                if mentions_high_confidence(last) {
                    info!(iteration, "High-confidence observation, stopping early");
                    break;
                }
            }
            if let Some((previous, last)) = observations.last_two() {
                if observations_similar(previous, last) {
                    info!(iteration, "Observations converged, stopping early");
                    break;
                }
                if citations_stable(previous, last) {
                    info!(iteration, "Citations stable, stopping early");
                    break;
                }
            }
        }
    }

    // A loop that never acted still synthesizes from its reasoning.
    if act_results.is_empty() {
        act_results.push(AgentExecutionResult {
            agent_id: "react-reason".to_string(),
            response: thoughts.last().unwrap_or_default().to_string(),
            success: true,
            ..Default::default()
        });
    }

    // Final synthesis over everything the loop gathered.
    let plan = DecompositionResult {
        subtasks: act_results
            .iter()
            .enumerate()
            .map(|(i, _)| Subtask::new(format!("step-{}", i + 1), ""))
            .collect(),
        ..Default::default()
    };
    let mut result =
        finalize_fleet_results(ctx, input, &plan, act_results, kind, UsagePhase::ReactSynth)
            .await?;
    result
        .metadata
        .insert_extra("loop_thoughts", serde_json::json!(thoughts.render().len()));
    Ok(result)
}

/// One loop-phase agent call, usage recorded under the given phase.
/// Returns `None` when the activity failed after retries.
async fn call_agent(
    ctx: &WorkflowCtx,
    input: &TaskInput,
    agent_id: &str,
    prompt: String,
    suggested_tools: Vec<String>,
    phase: UsagePhase,
) -> Result<Option<AgentExecutionResult>> {
    let request = AgentExecutionRequest {
        query: prompt,
        agent_id: agent_id.to_string(),
        context: input.context.to_value(),
        mode: input.mode.clone(),
        session_id: input.session_id.clone(),
        history: Vec::new(),
        suggested_tools,
        tool_parameters: Default::default(),
        parent_workflow_id: Some(ctx.workflow_id.clone()),
        role: None,
    };

    let agents = ctx.activities.agents.clone();
    let retried = request.clone();
    let outcome = with_retries("execute_agent", 3, move || {
        let agents = agents.clone();
        let request = retried.clone();
        async move { agents.execute_agent(request).await }
    })
    .await;

    match outcome {
        Ok(result) => {
            let (input_tokens, output_tokens) = result.token_split();
            ctx.record_usage(
                agent_id,
                &result.model_used,
                &result.provider,
                input_tokens,
                output_tokens,
                phase,
                input.user_id.as_deref(),
                input.session_id.as_deref(),
            )
            .await;
            Ok(Some(result))
        }
        Err(ActivityError::Cancelled) => Err(EngineError::Activity(ActivityError::Cancelled)),
        Err(error) => {
            warn!(agent_id, error = %error, "Loop agent call failed");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_phrases_match_case_insensitive() {
        assert!(mentions_completion("The TASK is COMPLETE now."));
        assert!(mentions_completion("I am done."));
        assert!(!mentions_completion("Still working on it."));
    }

    #[test]
    fn similarity_requires_length_and_overlap() {
        let a = "Action result: the capital of France is Paris with population data";
        let b = "Action result: the capital of France is Paris with updated figures";
        assert!(observations_similar(a, b));

        let c = "Completely different content about rust memory safety and borrowing";
        assert!(!observations_similar(a, c));

        let short = "ok";
        assert!(!observations_similar(a, short));
    }

    #[test]
    fn citation_stability_requires_equal_nonzero_counts() {
        let a = "Found https://a.com and https://b.com in the results";
        let b = "Found https://a.com and https://c.com in the output!";
        assert!(citations_stable(a, b));

        let none = "No links here at all, nothing to see";
        assert!(!citations_stable(none, none));

        let one = "Only https://a.com this time around here";
        assert!(!citations_stable(a, one));
    }

    #[test]
    fn window_log_truncates_with_summary() {
        let mut log = WindowLog::new(3);
        for i in 0..5 {
            log.push(format!("obs-{i}"));
        }
        let rendered = log.render();
        assert_eq!(rendered[0], "[2 older observations truncated]");
        assert_eq!(rendered.len(), 4);
        assert_eq!(rendered.last().unwrap(), "obs-4");
    }

    #[test]
    fn window_log_last_two() {
        let mut log = WindowLog::new(5);
        assert!(log.last_two().is_none());
        log.push("a".into());
        log.push("b".into());
        assert_eq!(log.last_two().unwrap(), ("a", "b"));
    }
}
