use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::rails::RailError;

/// Bounded retry budget for external rail calls: 3 attempts, exponential
/// backoff starting at one second and doubling, with explicit rate-limit
/// signals honored at the server-provided delay when it is longer.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Millisecond-scale delays for tests.
    pub fn fast() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
            backoff_factor: 2.0,
        }
    }
}

fn is_retryable(error: &RailError) -> bool {
    matches!(
        error,
        RailError::Transport(_) | RailError::RateLimited { .. }
    )
}

/// Executes a rail call with the bounded retry budget. Hard rejections are
/// surfaced immediately; the last error is returned once the budget is
/// exhausted.
pub async fn with_backoff<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, RailError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RailError>>,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(operation = operation_name, attempts, "Succeeded after retry");
                }
                return Ok(result);
            }
            Err(error) => {
                if attempts >= config.max_attempts || !is_retryable(&error) {
                    warn!(
                        operation = operation_name,
                        attempts,
                        error = %error,
                        "Giving up"
                    );
                    return Err(error);
                }

                let wait = match &error {
                    RailError::RateLimited { retry_after } => (*retry_after).max(delay),
                    _ => delay,
                };
                warn!(
                    operation = operation_name,
                    attempt = attempts,
                    error = %error,
                    retry_in = ?wait,
                    "Attempt failed; retrying"
                );
                sleep(wait).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_factor)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn transport_errors_are_retried_up_to_the_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RailError> = with_backoff(&RetryConfig::fast(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RailError::Transport("down".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rejections_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RailError> = with_backoff(&RetryConfig::fast(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RailError::Rejected("bad request".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_when_a_later_attempt_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_backoff(&RetryConfig::fast(), "test", || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(RailError::RateLimited {
                        retry_after: Duration::from_millis(1),
                    })
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
