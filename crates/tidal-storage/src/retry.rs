//! Bounded retry with exponential backoff.

use std::future::Future;

use tidal_core::{CoreResult, RetryConfig};
use tracing::warn;

/// Runs `op` until it succeeds, fails with a non-retryable error, or
/// `config.max_attempts` attempts have been made.
///
/// Only errors for which `CoreError::is_retryable` holds are retried. The last
/// error is returned once attempts are exhausted.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    operation: &'static str,
    mut op: F,
) -> CoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CoreResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < max_attempts => {
                let delay = config.backoff_for_attempt(attempt);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying after transient error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
