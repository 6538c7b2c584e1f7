//! Activity retry helper.

use std::future::Future;
use std::time::Duration;

use tracing::warn;
use troupe_traits::{ActivityError, ActivityResult};

const BASE_BACKOFF_MS: u64 = 50;
const MAX_BACKOFF_MS: u64 = 5_000;

/// Run an activity closure with up to `attempts` tries.
///
/// Only retryable errors ([`ActivityError::is_retryable`]) are retried, with
/// exponential backoff. Cancellation and fatal errors propagate immediately.
pub async fn with_retries<T, F, Fut>(label: &str, attempts: u32, mut call: F) -> ActivityResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ActivityResult<T>>,
{
    let attempts = attempts.max(1);
    let mut last_error = ActivityError::Fatal(format!("{label}: no attempts made"));

    for attempt in 1..=attempts {
        match call().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt < attempts => {
                warn!(activity = label, attempt, error = %error, "Retrying activity");
                let backoff = (BASE_BACKOFF_MS << (attempt - 1)).min(MAX_BACKOFF_MS);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                last_error = error;
            }
            Err(error) => return Err(error),
        }
    }

    Err(last_error)
}
