//! Bounded exponential-backoff retry for store operations.
//!
//! Every repository operation is a single store call submitted through
//! [`run_with_retry`]. Transient failures (connectivity, timeout) are
//! re-attempted with exponential backoff; everything else propagates
//! immediately. Only idempotent operations may be submitted - inserts are
//! idempotent because identifiers are caller-supplied.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, warn};

use crate::error::StoreError;

/// Retry policy for store operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt.
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,

    /// Upper bound on the backoff delay.
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with a custom attempt budget.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Create a policy with custom backoff delays.
    #[must_use]
    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }

    /// Backoff delay after the given failed attempt (1-based):
    /// `min(base * 2^(attempt-1), max)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Failure of a retried store operation.
#[derive(Debug, Error)]
pub enum RetryError {
    /// All attempts failed with transient errors.
    #[error("{operation} failed after {attempts} attempts over {elapsed:?}: {source}")]
    Exhausted {
        /// Name of the store operation, for observability.
        operation: &'static str,
        /// Number of attempts made.
        attempts: u32,
        /// Wall time spent across attempts and backoff.
        elapsed: Duration,
        /// The last transient error observed.
        #[source]
        source: StoreError,
    },

    /// A non-retryable error propagated from the first failing attempt.
    #[error(transparent)]
    Fatal(#[from] StoreError),
}

/// Execute a store operation under the given retry policy.
///
/// The operation is invoked at most `policy.max_attempts` times. Backoff
/// between attempts is a non-blocking timed suspension; other tasks are
/// never blocked while waiting.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> std::result::Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = crate::error::Result<T>>,
{
    let started = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(RetryError::Fatal(err)),
            Err(err) if attempt >= max_attempts => {
                error!(
                    operation,
                    attempts = attempt,
                    kind = err.kind(),
                    error = %err,
                    "store operation failed, retries exhausted"
                );
                return Err(RetryError::Exhausted {
                    operation,
                    attempts: attempt,
                    elapsed: started.elapsed(),
                    source: err,
                });
            }
            Err(err) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient store failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default().with_delays(Duration::from_millis(10), Duration::from_millis(100))
    }

    #[test]
    fn policy_default_values() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
    }

    #[test]
    fn delay_doubles_per_attempt_up_to_cap() {
        let policy = RetryPolicy::default().with_delays(
            Duration::from_millis(100),
            Duration::from_millis(500),
        );

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(30), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_k_failures_invokes_k_plus_one_times() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = run_with_retry(&fast_policy(), "test.op", move || {
            let calls = counter.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StoreError::Timeout("slow".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_exhausts_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = run_with_retry(&fast_policy(), "test.op", move || {
            let calls = counter.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(StoreError::Connection("refused".into()))
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            RetryError::Exhausted {
                operation,
                attempts,
                source,
                ..
            } => {
                assert_eq!(operation, "test.op");
                assert_eq!(attempts, 3);
                assert_eq!(source.kind(), "connection");
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = run_with_retry(&fast_policy(), "test.op", move || {
            let calls = counter.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(StoreError::Conflict("dup".into()))
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, RetryError::Fatal(StoreError::Conflict(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_success_invokes_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = run_with_retry(&fast_policy(), "test.op", move || {
            let calls = counter.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, StoreError>("ok")
            }
        })
        .await
        .unwrap();

        assert_eq!(result, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn policy_deserializes_with_defaults() {
        let policy: RetryPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy, RetryPolicy::default());
    }

    #[test]
    fn policy_deserializes_humantime_durations() {
        let policy: RetryPolicy =
            serde_json::from_str(r#"{"max_attempts": 5, "base_delay": "250ms", "max_delay": "2s"}"#)
                .unwrap();

        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(2));
    }
}
