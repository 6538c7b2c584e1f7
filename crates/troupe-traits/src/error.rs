//! Activity error taxonomy.

use thiserror::Error;

/// Errors surfaced by activity implementations.
///
/// The engine retries `Transient` failures per the call-site's attempt
/// budget, fails fast on `Fatal`, and never swallows `Cancelled`.
#[derive(Error, Debug, Clone)]
pub enum ActivityError {
    #[error("transient activity failure: {0}")]
    Transient(String),

    #[error("activity failed: {0}")]
    Fatal(String),

    #[error("activity timed out after {0}s")]
    Timeout(u64),

    #[error("activity cancelled")]
    Cancelled,
}

impl ActivityError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

pub type ActivityResult<T> = Result<T, ActivityError>;
