//! Bounded retry with exponential backoff for collaborator calls.

use crate::error::RecapError;
use std::future::Future;
use std::time::Duration;
use tokio_retry2::strategy::{jitter, ExponentialBackoff};
use tokio_retry2::{Retry, RetryError};
use tracing::warn;

/// How often and how patiently a call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    /// Base delay of the exponential backoff.
    pub base_delay_ms: u64,
    /// Upper bound for a single delay.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Run `operation`, retrying transient failures according to `policy`.
///
/// Permanent errors are returned immediately; after the last attempt the
/// final transient error is returned.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, RecapError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RecapError>>,
{
    let strategy = ExponentialBackoff::from_millis(policy.base_delay_ms.max(1))
        .factor(2)
        .max_delay(Duration::from_millis(policy.max_delay_ms.max(1)))
        .map(jitter)
        .take(policy.max_attempts.saturating_sub(1));

    Retry::spawn(strategy, || {
        let attempt = operation();
        async move {
            match attempt.await {
                Ok(value) => Ok(value),
                Err(e) if e.is_retryable() => {
                    warn!("{}: transient error, will retry: {}", label, e);
                    Err(RetryError::Transient {
                        err: e,
                        retry_after: None,
                    })
                }
                Err(e) => Err(RetryError::Permanent(e)),
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicUsize::new(0);
        let result = with_retry(&fast_policy(3), "test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(RecapError::transient("github", "503"))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(3), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RecapError::transient("harvest", "429"))
        })
        .await;

        assert_eq!(result, Err(RecapError::transient("harvest", "429")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(5), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RecapError::upstream("github", "401 Unauthorized"))
        })
        .await;

        tokio_test::assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
