//! Exponential backoff for rate-limited provider calls.

use std::future::Future;

use crate::config::RetryPolicy;
use crate::error::ProviderError;

/// Retry `operation` while it fails with a rate-limit signal.
///
/// Other failures return immediately. After `max_attempts` rate-limited
/// attempts the last rate-limit error is returned.
pub async fn retry_on_rate_limit<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        "Provider call succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if err.is_rate_limited() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    "Rate limited, will retry after backoff"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                if err.is_rate_limited() {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        "Rate limit persisted after max attempts"
                    );
                }
                return Err(err);
            }
        }
    }
}
