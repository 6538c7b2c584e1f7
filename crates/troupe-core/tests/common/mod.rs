//! Mock activity implementations shared by the scenario tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use troupe_models::{
    AgentExecutionResult, DecompositionResult, HistoryMessage, TokenUsageRecord, ToolExecution,
    WorkspaceEntry,
};
use troupe_traits::{
    Activities, ActivityError, ActivityResult, AgentExecutionRequest, AgentExecutor,
    AgentPerformanceRecord, ApprovalGate, ApprovalRequest, BudgetCheckRequest, BudgetControl,
    BudgetDecision, BudgetedExecutionRequest, CompressedContext, CompressionRequest,
    DecompositionAdvice, DecompositionRequest, Evaluation, MemoryStore, Persistence, Planner,
    ResearchPlan, SynthesisOutput, SynthesisRequest, Synthesizer, TeamChange, TeamPolicy,
    VerificationReport, WorkspaceStore,
};

/// Planner that returns a fixed plan.
pub struct MockPlanner {
    pub plan: Mutex<DecompositionResult>,
    pub recommendation: Mutex<Option<String>>,
}

impl MockPlanner {
    pub fn with_plan(plan: DecompositionResult) -> Self {
        Self {
            plan: Mutex::new(plan),
            recommendation: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Planner for MockPlanner {
    async fn decompose_task(
        &self,
        _request: DecompositionRequest,
    ) -> ActivityResult<DecompositionResult> {
        Ok(self.plan.lock().clone())
    }

    async fn recommend_strategy(
        &self,
        _query: &str,
        _context: &Value,
    ) -> ActivityResult<Option<String>> {
        Ok(self.recommendation.lock().clone())
    }

    async fn generate_research_plan(
        &self,
        query: &str,
        _context: &Value,
    ) -> ActivityResult<ResearchPlan> {
        Ok(ResearchPlan {
            plan: format!("research plan for: {query}"),
            areas: vec!["background".to_string()],
            tokens_used: 5,
        })
    }

    async fn advise_decomposition(
        &self,
        _query: &str,
        _memory: &Value,
    ) -> ActivityResult<Option<DecompositionAdvice>> {
        Ok(None)
    }
}

/// One scripted agent response, matched on a query substring.
pub struct ScriptedResponse {
    pub query_contains: String,
    pub result: AgentExecutionResult,
}

/// Agent executor with substring-scripted responses and call recording.
#[derive(Default)]
pub struct MockAgents {
    pub script: Mutex<Vec<ScriptedResponse>>,
    pub calls: Mutex<Vec<AgentExecutionRequest>>,
    pub delay: Mutex<Option<Duration>>,
}

impl MockAgents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, query_contains: &str, result: AgentExecutionResult) {
        self.script.lock().push(ScriptedResponse {
            query_contains: query_contains.to_string(),
            result,
        });
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> Vec<AgentExecutionRequest> {
        self.calls.lock().clone()
    }

    async fn answer(&self, request: AgentExecutionRequest) -> ActivityResult<AgentExecutionResult> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let response = {
            let script = self.script.lock();
            script
                .iter()
                .find(|entry| request.query.contains(&entry.query_contains))
                .map(|entry| entry.result.clone())
        };
        self.calls.lock().push(request.clone());
        Ok(response.unwrap_or(AgentExecutionResult {
            agent_id: request.agent_id,
            response: "task complete: default mock answer".to_string(),
            success: true,
            tokens_used: 5,
            model_used: "claude-sonnet-4".to_string(),
            provider: "anthropic".to_string(),
            ..Default::default()
        }))
    }
}

#[async_trait]
impl AgentExecutor for MockAgents {
    async fn execute_agent(
        &self,
        request: AgentExecutionRequest,
    ) -> ActivityResult<AgentExecutionResult> {
        self.answer(request).await
    }

    async fn execute_agent_with_budget(
        &self,
        request: BudgetedExecutionRequest,
    ) -> ActivityResult<AgentExecutionResult> {
        self.answer(request.agent).await
    }

    async fn execute_simple_task(
        &self,
        request: AgentExecutionRequest,
    ) -> ActivityResult<AgentExecutionResult> {
        self.answer(request).await
    }
}

/// How the mock synthesizer produces its final text.
pub enum SynthBehavior {
    Fixed { text: String, tokens: u64 },
    LastResponse,
}

pub struct MockSynthesizer {
    pub behavior: Mutex<SynthBehavior>,
    pub calls: Mutex<usize>,
}

impl MockSynthesizer {
    pub fn fixed(text: &str, tokens: u64) -> Self {
        Self {
            behavior: Mutex::new(SynthBehavior::Fixed {
                text: text.to_string(),
                tokens,
            }),
            calls: Mutex::new(0),
        }
    }

    pub fn last_response() -> Self {
        Self {
            behavior: Mutex::new(SynthBehavior::LastResponse),
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, request: SynthesisRequest) -> ActivityResult<SynthesisOutput> {
        *self.calls.lock() += 1;
        let behavior = self.behavior.lock();
        let (final_result, tokens_used) = match &*behavior {
            SynthBehavior::Fixed { text, tokens } => (text.clone(), *tokens),
            SynthBehavior::LastResponse => {
                let last = request
                    .agent_results
                    .iter()
                    .rev()
                    .find(|r| r.success)
                    .map(|r| r.response.clone())
                    .unwrap_or_default();
                (last, 10)
            }
        };
        Ok(SynthesisOutput {
            final_result,
            tokens_used,
            model_used: "claude-sonnet-4".to_string(),
            provider: "anthropic".to_string(),
            ..Default::default()
        })
    }

    async fn evaluate_result(
        &self,
        _query: &str,
        _response: &str,
        _criteria: &str,
    ) -> ActivityResult<Evaluation> {
        Ok(Evaluation {
            score: 0.95,
            feedback: String::new(),
        })
    }

    async fn verify_claims(
        &self,
        _query: &str,
        _response: &str,
        _citations: &[troupe_models::Citation],
    ) -> ActivityResult<VerificationReport> {
        Ok(VerificationReport {
            verified: true,
            ..Default::default()
        })
    }
}

/// Budget service with a configurable decision and recorded usage.
pub struct MockBudget {
    pub decision: Mutex<BudgetDecision>,
    pub records: Mutex<Vec<TokenUsageRecord>>,
}

impl MockBudget {
    pub fn allowing(remaining: u64) -> Self {
        Self {
            decision: Mutex::new(BudgetDecision {
                can_proceed: true,
                remaining_task_budget: remaining,
                ..Default::default()
            }),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn denying(reason: &str) -> Self {
        Self {
            decision: Mutex::new(BudgetDecision {
                can_proceed: false,
                reason: reason.to_string(),
                ..Default::default()
            }),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn recorded(&self) -> Vec<TokenUsageRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl BudgetControl for MockBudget {
    async fn check_token_budget(
        &self,
        _request: BudgetCheckRequest,
    ) -> ActivityResult<BudgetDecision> {
        Ok(self.decision.lock().clone())
    }

    async fn record_token_usage(&self, record: TokenUsageRecord) -> ActivityResult<()> {
        self.records.lock().push(record);
        Ok(())
    }
}

/// Memory store with no stored memories and trivial compression.
pub struct MockMemory;

#[async_trait]
impl MemoryStore for MockMemory {
    async fn fetch_session_memory(&self, _session_id: &str) -> ActivityResult<Option<Value>> {
        Ok(None)
    }

    async fn fetch_hierarchical_memory(
        &self,
        _user_id: &str,
        _query: &str,
    ) -> ActivityResult<Option<Value>> {
        Ok(None)
    }

    async fn fetch_supervisor_memory(&self, _user_id: &str) -> ActivityResult<Option<Value>> {
        Ok(None)
    }

    async fn check_compression_needed(&self, _session_id: &str) -> ActivityResult<bool> {
        Ok(false)
    }

    async fn compress_and_store_context(
        &self,
        request: CompressionRequest,
    ) -> ActivityResult<CompressedContext> {
        Ok(CompressedContext {
            summary: format!("[summary of {} messages]", request.history.len()),
            tokens_used: 8,
        })
    }

    async fn update_compression_state(
        &self,
        _session_id: &str,
        _summary_tokens: u64,
    ) -> ActivityResult<()> {
        Ok(())
    }
}

/// In-memory workspace store.
#[derive(Default)]
pub struct MemoryWorkspace {
    entries: Mutex<HashMap<(String, String), Vec<WorkspaceEntry>>>,
}

#[async_trait]
impl WorkspaceStore for MemoryWorkspace {
    async fn append(&self, workflow_id: &str, topic: &str, entry: Value) -> ActivityResult<u64> {
        let mut entries = self.entries.lock();
        let list = entries
            .entry((workflow_id.to_string(), topic.to_string()))
            .or_default();
        let seq = list.last().map(|e| e.seq + 1).unwrap_or(1);
        list.push(WorkspaceEntry::new(topic, seq, entry));
        Ok(seq)
    }

    async fn list(
        &self,
        workflow_id: &str,
        topic: &str,
        since_seq: u64,
        limit: usize,
    ) -> ActivityResult<Vec<WorkspaceEntry>> {
        let entries = self.entries.lock();
        let mut list: Vec<WorkspaceEntry> = entries
            .get(&(workflow_id.to_string(), topic.to_string()))
            .map(|l| l.iter().filter(|e| e.seq > since_seq).cloned().collect())
            .unwrap_or_default();
        if limit > 0 {
            list.truncate(limit);
        }
        Ok(list)
    }
}

/// Approval gate that only registers requests; decisions come via signals.
#[derive(Default)]
pub struct MockApprovals {
    pub requests: Mutex<Vec<ApprovalRequest>>,
}

#[async_trait]
impl ApprovalGate for MockApprovals {
    async fn request_approval(&self, request: ApprovalRequest) -> ActivityResult<String> {
        let id = format!("approval-{}", self.requests.lock().len() + 1);
        self.requests.lock().push(request);
        Ok(id)
    }
}

/// Persistence that counts calls and never fails.
#[derive(Default)]
pub struct MockPersistence {
    pub session_results: Mutex<Vec<(String, String)>>,
    pub performance_records: Mutex<Vec<AgentPerformanceRecord>>,
}

#[async_trait]
impl Persistence for MockPersistence {
    async fn record_query(&self, _session_id: &str, _query: &str) -> ActivityResult<()> {
        Ok(())
    }

    async fn update_session_result(
        &self,
        session_id: &str,
        result: &str,
        _tokens_used: u64,
    ) -> ActivityResult<()> {
        self.session_results
            .lock()
            .push((session_id.to_string(), result.to_string()));
        Ok(())
    }

    async fn record_decomposition(
        &self,
        _workflow_id: &str,
        _decomposition: &DecompositionResult,
    ) -> ActivityResult<()> {
        Ok(())
    }

    async fn record_agent_performance(
        &self,
        record: AgentPerformanceRecord,
    ) -> ActivityResult<()> {
        self.performance_records.lock().push(record);
        Ok(())
    }

    async fn persist_agent_execution(
        &self,
        _workflow_id: &str,
        _result: &AgentExecutionResult,
    ) -> ActivityResult<()> {
        Ok(())
    }

    async fn persist_tool_execution(
        &self,
        _workflow_id: &str,
        _agent_id: &str,
        _execution: &ToolExecution,
    ) -> ActivityResult<()> {
        Ok(())
    }

    async fn generate_session_title(&self, _session_id: &str, _query: &str) -> ActivityResult<()> {
        Ok(())
    }

    async fn get_workflow_config(&self) -> ActivityResult<Value> {
        Ok(Value::Null)
    }
}

/// Policy that authorizes every team change.
pub struct AllowAllPolicy;

#[async_trait]
impl TeamPolicy for AllowAllPolicy {
    async fn authorize_recruit(&self, _change: &TeamChange) -> ActivityResult<bool> {
        Ok(true)
    }

    async fn authorize_retire(&self, _change: &TeamChange) -> ActivityResult<bool> {
        Ok(true)
    }
}

/// The full mock stack with handles for assertions.
pub struct MockStack {
    pub planner: Arc<MockPlanner>,
    pub agents: Arc<MockAgents>,
    pub synthesizer: Arc<MockSynthesizer>,
    pub budget: Arc<MockBudget>,
    pub approvals: Arc<MockApprovals>,
    pub persistence: Arc<MockPersistence>,
}

impl MockStack {
    pub fn new(plan: DecompositionResult) -> Self {
        Self {
            planner: Arc::new(MockPlanner::with_plan(plan)),
            agents: Arc::new(MockAgents::new()),
            synthesizer: Arc::new(MockSynthesizer::last_response()),
            budget: Arc::new(MockBudget::allowing(100_000)),
            approvals: Arc::new(MockApprovals::default()),
            persistence: Arc::new(MockPersistence::default()),
        }
    }

    pub fn activities(&self) -> Activities {
        Activities {
            planner: self.planner.clone(),
            agents: self.agents.clone(),
            synthesizer: self.synthesizer.clone(),
            budget: self.budget.clone(),
            memory: Arc::new(MockMemory),
            workspace: Arc::new(MemoryWorkspace::default()),
            approvals: self.approvals.clone(),
            persistence: self.persistence.clone(),
            team_policy: Arc::new(AllowAllPolicy),
        }
    }
}

/// Convenience constructors used across scenarios.
pub fn agent_result(response: &str, tokens: u64) -> AgentExecutionResult {
    AgentExecutionResult {
        response: response.to_string(),
        success: true,
        tokens_used: tokens,
        model_used: "claude-sonnet-4".to_string(),
        provider: "anthropic".to_string(),
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn history(turns: &[(&str, &str)]) -> Vec<HistoryMessage> {
    turns
        .iter()
        .map(|(role, content)| HistoryMessage::new(*role, *content))
        .collect()
}

#[allow(dead_code)]
pub fn failing_agent(error: &str) -> ActivityResult<AgentExecutionResult> {
    Err(ActivityError::Fatal(error.to_string()))
}
