//! Bounded retry with exponential backoff for capability calls.
//!
//! The retry budget is owned by the engine, not delegated to the workflow
//! platform's auto-retry. Only transient failures (timeout, connection) are
//! retried; malformed or rejected responses fail immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::CapabilityError;

/// Retry budget for one logical capability call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before attempt `attempt` (1-based; attempt 1 has none).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(2).min(16);
        let delay = self.base_delay.saturating_mul(2u32.saturating_pow(exp));
        delay.min(self.max_delay)
    }
}

/// Run `op` until it succeeds, returns a non-transient error, or the attempt
/// budget is exhausted.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    op: F,
) -> Result<T, CapabilityError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, CapabilityError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_before(attempt + 1);
                warn!(
                    capability = %e.capability(),
                    attempt,
                    max_attempts = policy.max_attempts,
                    ?delay,
                    error = %e,
                    "Transient capability failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::capability::Capability;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn transient() -> CapabilityError {
        CapabilityError::Remote {
            capability: Capability::Fetch,
            reason: "connection refused".into(),
        }
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let calls = AtomicU32::new(0);
        let result = call_with_retry(&fast_policy(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, CapabilityError>(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = call_with_retry(&fast_policy(), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 { Err(transient()) } else { Ok(7) }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_budget_on_persistent_transient_failure() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, _> = call_with_retry(&fast_policy(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, _> = call_with_retry(&fast_policy(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CapabilityError::Malformed {
                capability: Capability::Classify,
                reason: "not json".into(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(500));
        assert_eq!(policy.delay_before(3), Duration::from_secs(1));
        // Capped at max_delay
        assert_eq!(policy.delay_before(4), Duration::from_secs(1));
    }
}
