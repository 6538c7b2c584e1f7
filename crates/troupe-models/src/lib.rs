//! Shared data model for the Troupe orchestration engine.
//!
//! Everything that crosses a boundary between the core engine, the activity
//! layer, and the transport surfaces lives here: task inputs and results,
//! decomposition plans, agent execution records, citations, workspace entries
//! and the pause/resume/cancel control state.

pub mod agent;
pub mod citation;
pub mod context;
pub mod control;
pub mod decomposition;
pub mod task;
pub mod template;
pub mod workspace;

pub use agent::{AgentExecutionResult, AgentUsage, TokenUsageRecord, ToolExecution, UsagePhase};
pub use citation::{Citation, CitationStats, QualityBuckets, ToolSource};
pub use context::{
    BudgetHints, CompressionHints, ModelHints, ReviewHints, RoutingHints, TaskContext,
    VerificationHints,
};
pub use control::{ControlSignal, ControlState};
pub use decomposition::{DecompositionResult, ExecutionStrategy, Subtask, TaskMode};
pub use task::{HistoryMessage, TaskInput, TaskMetadata, TaskResult};
pub use template::{TaskTemplate, TemplateNode, TemplateNodeKind};
pub use workspace::WorkspaceEntry;
