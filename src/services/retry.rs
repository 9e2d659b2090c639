/// Bounded retry with exponential backoff and a per-attempt timeout
use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Upper bound on one attempt; exceeding it counts as a transient failure.
    /// `None` leaves the bound to the source, e.g. an HTTP client timeout per request.
    pub call_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            call_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryPolicy {
    /// No retries, no waiting. Used by tests.
    pub fn immediate() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
            call_timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// Runs `f` until it succeeds, fails permanently, or retries run out.
///
/// Transient failures that outlast the policy surface as `Unavailable`.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, what: &str, mut f: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0;
    let mut backoff = policy.initial_backoff;

    loop {
        let attempt_result = match policy.call_timeout {
            Some(limit) => tokio::time::timeout(limit, f()).await.map_err(|_| {
                AppError::Unavailable(format!("{} timed out after {:?}", what, limit))
            }),
            None => Ok(f().await),
        };

        let err = match attempt_result {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if !e.is_transient() => return Err(e),
            Ok(Err(e)) => e,
            Err(timed_out) => timed_out,
        };

        attempt += 1;
        if attempt > policy.max_retries {
            tracing::error!(
                target_entity = %what,
                attempts = attempt,
                error = %err,
                "Giving up after transient failures"
            );
            return Err(match err {
                AppError::Unavailable(msg) => AppError::Unavailable(msg),
                other => AppError::Unavailable(format!("{}: {}", what, other)),
            });
        }

        tracing::warn!(
            target_entity = %what,
            attempt,
            max_retries = policy.max_retries,
            delay_ms = backoff.as_millis() as u64,
            error = %err,
            "Transient failure, retrying"
        );

        tokio::time::sleep(backoff).await;

        backoff = Duration::from_millis(
            ((backoff.as_millis() as f64 * policy.backoff_multiplier)
                .min(policy.max_backoff.as_millis() as f64)) as u64,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            call_timeout: Some(Duration::from_millis(200)),
        }
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&fast_policy(3), "user 1", move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err(AppError::Unavailable("503".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: AppResult<u32> = with_retry(&fast_policy(3), "user 1", move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::NotFound("private".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_unavailable() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: AppResult<u32> = with_retry(&fast_policy(2), "user 1", move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::Unavailable("502".to_string())) }
        })
        .await;

        match result {
            Err(AppError::Unavailable(msg)) => assert_eq!(msg, "502"),
            other => panic!("expected Unavailable, got {:?}", other),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejected_query_is_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: AppResult<u32> = with_retry(&fast_policy(3), "media 9", move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::ExternalApi("Validation error".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(AppError::ExternalApi(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let policy = RetryPolicy {
            call_timeout: Some(Duration::from_millis(10)),
            ..fast_policy(1)
        };

        let result: AppResult<u32> = with_retry(&policy, "media 9", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1)
        })
        .await;

        match result {
            Err(AppError::Unavailable(msg)) => assert!(msg.contains("timed out")),
            other => panic!("expected Unavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_without_call_timeout_slow_attempt_completes() {
        let policy = RetryPolicy {
            call_timeout: None,
            ..fast_policy(0)
        };

        let result = with_retry(&policy, "media 9", || async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(7)
        })
        .await;

        assert_eq!(result.unwrap(), 7);
    }
}
