use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::Error;
use crate::broker::BrokerError;
use crate::config::millis;

/// Bounded exponential backoff for transient broker failures.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: usize,

    /// Delay after the first failed attempt.
    #[serde(rename = "base_delay_ms", deserialize_with = "millis")]
    pub base_delay: Duration,

    /// Upper bound for any single delay.
    #[serde(rename = "max_delay_ms", deserialize_with = "millis")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based), before jitter.
    ///
    /// Doubles with every attempt and saturates at `max_delay`.
    #[must_use]
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX);

        2u32.checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// [`backoff`](Self::backoff) scaled by a random factor in `[0.9, 1.1)`,
    /// still capped at `max_delay`.
    #[must_use]
    pub fn jittered_backoff(&self, attempt: usize) -> Duration {
        self.backoff(attempt)
            .mul_f64(fastrand::f64().mul_add(0.2, 0.9))
            .min(self.max_delay)
    }

    /// Runs `operation` until it succeeds, fails permanently, or attempts run out.
    ///
    /// On success returns the value together with the number of attempts it took.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Broker`] for a permanent failure and
    /// [`Error::RetriesExhausted`] once every attempt failed transiently.
    pub async fn run<F, Fut, T>(&self, name: &str, mut operation: F) -> Result<(T, usize), Error>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = name, attempt, "succeeded after retry");
                    }

                    return Ok((value, attempt));
                }
                Err(e) if !e.is_transient() => {
                    error!(
                        operation = name,
                        attempt,
                        error = %e,
                        "permanent failure, not retrying"
                    );

                    return Err(Error::Broker(e));
                }
                Err(e) if attempt >= max_attempts => {
                    error!(operation = name, attempts = attempt, error = %e, "retries exhausted");

                    return Err(Error::RetriesExhausted {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    let delay = self.jittered_backoff(attempt);

                    warn!(
                        operation = name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "transient failure, retrying"
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
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));

        let delays: Vec<_> = (1..=5).map(|n| policy.backoff(n)).collect();
        assert!(delays.windows(2).all(|pair| pair[1] == pair[0] * 2));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.backoff(7), Duration::from_secs(5));
        assert_eq!(policy.backoff(200), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_near_backoff() {
        let policy = RetryPolicy::default();

        for _ in 0..100 {
            let delay = policy.jittered_backoff(2);
            assert!(delay >= Duration::from_millis(180));
            assert!(delay < Duration::from_millis(220));
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicUsize::new(0);

        let result = fast()
            .run("test", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(BrokerError::transient("unavailable"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_matches!(result, Ok((42, 3)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let calls = AtomicUsize::new(0);

        let result: Result<((), usize), Error> = fast()
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BrokerError::transient("timeout")) }
            })
            .await;

        assert_matches!(result, Err(Error::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicUsize::new(0);

        let result: Result<((), usize), Error> = fast()
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(BrokerError::permanent("bad subject")) }
            })
            .await;

        assert_matches!(result, Err(Error::Broker(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
