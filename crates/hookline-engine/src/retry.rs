//! Bounded retry with configurable backoff for agent calls.

use std::future::Future;
use std::time::Duration;

use hookline_types::Result;

/// Backoff policy controlling the delay between retry attempts.
#[derive(Debug, Clone)]
pub enum BackoffPolicy {
    Fixed(Duration),
    /// Exponential backoff: base * 2^attempt, capped at max.
    Exponential { base: Duration, max: Duration },
    None,
}

impl BackoffPolicy {
    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match self {
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::Exponential { base, max } => {
                let millis = base.as_millis() as u64 * 2u64.saturating_pow(attempt as u32);
                Duration::from_millis(millis).min(*max)
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }
}

/// Retry budget for one agent task. The budget is per task, not per stage:
/// a stage with twelve units may retry each unit independently.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first. Zero disables retries.
    pub max_retries: usize,
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff: BackoffPolicy::Exponential {
                base: Duration::from_millis(500),
                max: Duration::from_secs(30),
            },
        }
    }
}

impl RetryPolicy {
    /// No retries, no delay. Used by tests and reruns.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: BackoffPolicy::None,
        }
    }
}

/// Call `f` up to `policy.max_retries + 1` times, retrying only errors that
/// report [`hookline_types::HooklineError::is_retryable`]. `on_retry` fires
/// before each re-attempt with the 1-based attempt number.
pub async fn execute_with_retry<T, F, Fut>(
    f: F,
    policy: &RetryPolicy,
    task_key: &str,
    mut on_retry: impl FnMut(usize),
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.backoff.delay_for_attempt(attempt);
                tracing::warn!(
                    task = %task_key,
                    attempt,
                    delay_ms = %delay.as_millis(),
                    error = %e,
                    "Retryable error, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
                on_retry(attempt);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookline_types::HooklineError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn transient() -> HooklineError {
        HooklineError::AgentTransport {
            message: "503".into(),
            retryable: true,
        }
    }

    #[tokio::test]
    async fn success_on_first_try() {
        let result = execute_with_retry(
            || async { Ok(7) },
            &RetryPolicy::default(),
            "task",
            |_| {},
        )
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn retryable_error_retried_then_succeeds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cc = calls.clone();
        let policy = RetryPolicy {
            max_retries: 2,
            backoff: BackoffPolicy::None,
        };

        let result = execute_with_retry(
            move || {
                let cc = cc.clone();
                async move {
                    if cc.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(transient())
                    } else {
                        Ok("recovered")
                    }
                }
            },
            &policy,
            "task",
            |_| {},
        )
        .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn budget_exhausted_returns_last_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cc = calls.clone();
        let policy = RetryPolicy {
            max_retries: 1,
            backoff: BackoffPolicy::None,
        };

        let result: Result<()> = execute_with_retry(
            move || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Err(transient())
                }
            },
            &policy,
            "task",
            |_| {},
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_error_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cc = calls.clone();

        let result: Result<()> = execute_with_retry(
            move || {
                let cc = cc.clone();
                async move {
                    cc.fetch_add(1, Ordering::SeqCst);
                    Err(HooklineError::AgentFailure {
                        unit: "u".into(),
                        message: "bad schema".into(),
                        retryable: false,
                    })
                }
            },
            &RetryPolicy::default(),
            "task",
            |_| {},
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn on_retry_reports_attempt_numbers() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        let policy = RetryPolicy {
            max_retries: 2,
            backoff: BackoffPolicy::None,
        };

        let _: Result<()> = execute_with_retry(
            || async { Err(transient()) },
            &policy,
            "task",
            move |attempt| seen2.lock().unwrap().push(attempt),
        )
        .await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy = BackoffPolicy::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn none_policy_has_no_budget() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.max_retries, 0);
        assert_eq!(policy.backoff.delay_for_attempt(5), Duration::ZERO);
    }
}
