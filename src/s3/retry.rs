use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{DeployError, Result};

/// Exponential backoff policy shared by every network call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Run `op` until it succeeds, retrying retryable failures with backoff.
///
/// After `max_retries` retries the last error is wrapped in
/// [`DeployError::RetriesExhausted`]. Non-retryable errors are returned as is.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", operation, attempt);
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= policy.max_retries => {
                return Err(DeployError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt + 1,
                    source: Box::new(e),
                });
            }
            Err(e) => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    operation,
                    attempt,
                    policy.max_retries + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn flaky(failures: u32, calls: &AtomicU32) -> Result<&'static str> {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < failures {
            Err(DeployError::Network {
                message: format!("transient {}", n),
            })
        } else {
            Ok("done")
        }
    }

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(40), Duration::from_millis(100) * u32::MAX);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result =
            retry(&policy, "PUT index.html", move || async move { flaky(3, calls) }).await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result =
            retry(&policy, "HEAD index.html", move || async move { flaky(10, calls) }).await;

        match result {
            Err(DeployError::RetriesExhausted {
                operation,
                attempts,
                ..
            }) => {
                assert_eq!(operation, "HEAD index.html");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_non_retryable() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<()> = retry(&policy, "PUT", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DeployError::Cancelled)
        })
        .await;

        assert!(matches!(result, Err(DeployError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_retries_single_attempt() {
        let policy = RetryPolicy::new(0, Duration::from_millis(1));
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result = retry(&policy, "PUT", move || async move { flaky(1, calls) }).await;

        assert!(matches!(
            result,
            Err(DeployError::RetriesExhausted { attempts: 1, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
