//! Engine error types.

use thiserror::Error;
use troupe_traits::ActivityError;

/// Errors surfaced by the orchestration engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("budget denied: {0}")]
    BudgetDenied(String),

    #[error("workflow cancelled: {0}")]
    Cancelled(String),

    #[error("activity error: {0}")]
    Activity(#[from] ActivityError),
}

impl EngineError {
    /// Cancellation is surfaced distinctly and never swallowed.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
            || matches!(self, Self::Activity(ActivityError::Cancelled))
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
