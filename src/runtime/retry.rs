/// Retry executor for single step attempts
///
/// Wraps a producer in a retry policy: run, and on failure wait the
/// policy-prescribed delay before re-running, up to `attempts` total times.
/// The executor does not interpret error kinds — every failure retries
/// uniformly, and the last error survives exhaustion unchanged. Classifying
/// transient vs permanent failures is the backend's concern.

use crate::error::OrchestratorError;
use crate::job::types::RetryPolicy;
use std::future::Future;

/// Run `operation` under the given policy
///
/// With no policy (or `attempts <= 1`) the first error propagates untouched
/// and no delay is ever awaited.
pub async fn execute_with_retry<T, F, Fut>(
    policy: Option<&RetryPolicy>,
    mut operation: F,
) -> Result<T, OrchestratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OrchestratorError>>,
{
    let attempts = policy.map_or(1, |p| p.attempts.max(1));
    let mut last_error = None;

    for attempt in 1..=attempts {
        if attempt > 1 {
            if let Some(policy) = policy {
                let wait = policy.delay_before_retry(attempt - 1);
                tracing::debug!(
                    "🔁 Retry {}/{} after {:?}",
                    attempt,
                    attempts,
                    wait
                );
                tokio::time::sleep(wait).await;
            }
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt < attempts {
                    tracing::warn!(
                        "⚠️ Attempt {}/{} failed: {}",
                        attempt,
                        attempts,
                        error
                    );
                }
                last_error = Some(error);
            }
        }
    }

    Err(last_error.expect("at least one attempt always runs"))
}
