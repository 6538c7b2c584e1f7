//! Activity and store contracts consumed by the Troupe engine.
//!
//! The engine treats LLM calls, tool execution, budget accounting, memory and
//! persistence as opaque activities behind these traits. Implementations live
//! with the transport/provider layers; tests supply mocks.

use std::sync::Arc;

pub mod agent;
pub mod approval;
pub mod budget;
pub mod error;
pub mod memory;
pub mod persistence;
pub mod planner;
pub mod synthesis;
pub mod team;
pub mod workspace;

pub use agent::{AgentExecutionRequest, AgentExecutor, BudgetedExecutionRequest};
pub use approval::{ApprovalDecision, ApprovalGate, ApprovalRequest};
pub use budget::{BudgetCheckRequest, BudgetControl, BudgetDecision};
pub use error::{ActivityError, ActivityResult};
pub use memory::{CompressedContext, CompressionRequest, MemoryStore};
pub use persistence::{AgentPerformanceRecord, Persistence};
pub use planner::{DecompositionAdvice, DecompositionRequest, Planner, ResearchPlan};
pub use synthesis::{Evaluation, SynthesisOutput, SynthesisRequest, Synthesizer, VerificationReport};
pub use team::{TeamChange, TeamPolicy};
pub use workspace::WorkspaceStore;

/// Bundle of activity handles a workflow execution carries.
#[derive(Clone)]
pub struct Activities {
    pub planner: Arc<dyn Planner>,
    pub agents: Arc<dyn AgentExecutor>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub budget: Arc<dyn BudgetControl>,
    pub memory: Arc<dyn MemoryStore>,
    pub workspace: Arc<dyn WorkspaceStore>,
    pub approvals: Arc<dyn ApprovalGate>,
    pub persistence: Arc<dyn Persistence>,
    pub team_policy: Arc<dyn TeamPolicy>,
}
