//! Retry policy with exponential backoff and jitter.
//!
//! Retry `n` waits `2^n` seconds (retry 1 waits 2s, retry 8 waits 256s),
//! randomized ±25%, before the next try. Only transient errors are retried;
//! the last error is returned once attempts are exhausted. The retry count
//! is capped at [`MAX_RETRIES`]: at that depth the accumulated backoff sums
//! to 510s nominal, in the 8–13 minute range with jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use crate::domain::errors::DomainResult;

/// Hard ceiling on retries regardless of configuration.
pub const MAX_RETRIES: u32 = 8;

/// Default retries for a failed apply.
pub const DEFAULT_APPLY_RETRIES: u32 = 2;

/// Exponential-backoff retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_APPLY_RETRIES)
    }
}

impl RetryPolicy {
    /// Create a policy with the given retry count, capped at [`MAX_RETRIES`].
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.min(MAX_RETRIES),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Execute an async operation, retrying transient failures.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> DomainResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DomainResult<T>>,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if !err.is_transient() || attempt >= self.max_retries {
                        return Err(err);
                    }

                    let backoff = wait_time(attempt, &mut rand::thread_rng());
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "retrying after transient failure"
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Backoff before retry `attempt + 1`: `2^(attempt + 1)` seconds, jittered
/// ±25%. `attempt` is the 0-indexed count of failures so far, so the first
/// retry waits ~2s and the eighth ~256s.
fn wait_time<R: Rng>(attempt: u32, rng: &mut R) -> Duration {
    let base = f64::from(2u32.saturating_pow(attempt + 1));
    let jitter = base * 0.25;
    let secs = rng.gen_range(base - jitter..=base + jitter);
    Duration::from_secs_f64(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::DomainError;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_wait_time_stays_within_jitter_bounds() {
        let mut rng = StdRng::seed_from_u64(42);
        for attempt in 0..MAX_RETRIES {
            let base = f64::from(2u32.pow(attempt + 1));
            for _ in 0..50 {
                let wait = wait_time(attempt, &mut rng).as_secs_f64();
                assert!(wait >= base * 0.75, "attempt {attempt}: {wait} too short");
                assert!(wait <= base * 1.25, "attempt {attempt}: {wait} too long");
            }
        }
    }

    #[test]
    fn test_full_backoff_sequence_spans_documented_range() {
        // 2 + 4 + ... + 256 = 510s nominal; jitter bounds it to ±25%.
        let nominal: f64 = (0..MAX_RETRIES).map(|a| f64::from(2u32.pow(a + 1))).sum();
        assert!((nominal - 510.0).abs() < f64::EPSILON);
        assert!(nominal * 0.75 >= 380.0);
        assert!(nominal * 1.25 <= 13.0 * 60.0);
    }

    #[test]
    fn test_retry_count_is_capped() {
        assert_eq!(RetryPolicy::new(100).max_retries(), MAX_RETRIES);
        assert_eq!(RetryPolicy::default().max_retries(), DEFAULT_APPLY_RETRIES);
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));

        let result = policy
            .execute(|| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let policy = RetryPolicy::new(3);
        let calls = Arc::new(AtomicU32::new(0));

        let result = policy
            .execute(|| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(DomainError::Transient("apply interrupted".into()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let policy = RetryPolicy::new(3);
        let calls = Arc::new(AtomicU32::new(0));

        let result: DomainResult<()> = policy
            .execute(|| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(DomainError::Fatal("module is broken".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(DomainError::Fatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_last_error() {
        let policy = RetryPolicy::new(2);
        let calls = Arc::new(AtomicU32::new(0));

        let result: DomainResult<()> = policy
            .execute(|| {
                let calls = Arc::clone(&calls);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    Err(DomainError::Transient(format!("failure {n}")))
                }
            })
            .await;

        // Initial attempt plus two retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(DomainError::Transient(msg)) => assert_eq!(msg, "failure 2"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
