use rand::Rng;
use std::future::Future;
use std::time::Duration;

use super::http::FetchError;

/// Hard ceiling on a single backoff wait, whatever the factor and attempt.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Exponential backoff with uniform jitter, applied at the fetch call site.
///
/// Attempt `k` (1-based) that fails with a retryable error is followed by a
/// wait of `base_delay * factor^(k-1) + U(0, jitter_max)` before attempt
/// `k + 1`. After `max_attempts` the last error is returned unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: f64,
    pub jitter_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            jitter_max: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            factor: 1.0,
            jitter_max: Duration::ZERO,
        }
    }

    /// Deterministic part of the wait after failed attempt `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.factor.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.jitter_max.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `label` identifies the operation in log output (usually the URL).
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt: u32 = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    tracing::debug!(
                        target_url = %label,
                        attempts = attempt,
                        error = %e,
                        "Retries exhausted"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.backoff_for(attempt) + self.jitter();
                    tracing::warn!(
                        target_url = %label,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient fetch failure, retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_grows_by_factor() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            factor: 10.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff_for(50), MAX_BACKOFF);
    }

    #[test]
    fn test_jitter_within_bounds() {
        let policy = RetryPolicy {
            jitter_max: Duration::from_millis(50),
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            assert!(policy.jitter() <= Duration::from_millis(50));
        }
        assert_eq!(RetryPolicy::single_attempt().jitter(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds_within_bounds() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let result = policy
            .run("test", || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(FetchError::Timeout)
                    } else {
                        Ok("body")
                    }
                }
            })
            .await;

        let elapsed = start.elapsed();
        assert_eq!(result.unwrap(), "body");
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // base <= waited <= base * factor^2 + jitter_max * attempts
        let lower = policy.base_delay;
        let upper = policy.base_delay.mul_f64(policy.factor.powi(2))
            + policy.jitter_max * policy.max_attempts;
        assert!(elapsed >= lower, "waited {:?}, expected >= {:?}", elapsed, lower);
        assert!(elapsed <= upper, "waited {:?}, expected <= {:?}", elapsed, upper);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_last_error() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = policy
            .run("test", || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    Err(FetchError::HttpStatus(500 + n as u16))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            FetchError::HttpStatus(502) => {}
            e => panic!("Expected last error HttpStatus(502), got {:?}", e),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = policy
            .run("test", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(FetchError::HttpStatus(404))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(FetchError::HttpStatus(404))));
    }
}
