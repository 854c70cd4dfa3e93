//! Shared retry policy for external calls.
//!
//! Both the embedding client and the classification oracle talk to
//! rate-limited HTTP APIs and need the same failure handling: rate-limit
//! responses back off exponentially, other transient failures wait a fixed
//! short delay, and anything else fails immediately. The policy lives here
//! once instead of inside each call site.

use anyhow::{anyhow, Result};
use std::future::Future;
use std::time::Duration;

/// How a single attempt failed, as judged by the caller.
#[derive(Debug)]
pub enum Failure {
    /// Rate-limit class (HTTP 429). Retried with exponential backoff.
    RateLimited(anyhow::Error),
    /// Transient non-rate-limit class (5xx, network). Retried after a
    /// fixed short delay.
    Transient(anyhow::Error),
    /// Not retryable; surfaces immediately.
    Fatal(anyhow::Error),
}

/// Retry budget plus delay schedule for one class of external call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Backoff after the first rate-limited attempt; doubles per attempt.
    pub base_delay: Duration,
    /// Fixed wait between transient-failure attempts.
    pub flat_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, flat_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            flat_delay,
        }
    }

    /// Backoff before retrying after the rate-limited attempt `attempt`
    /// (0-based): `base`, `2*base`, `4*base`, ...
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    /// Drive `op` until it succeeds, fails fatally, or the attempt budget
    /// is exhausted. Delays are plain blocking sleeps on the current task;
    /// cancellation happens between calls, never mid-attempt.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, Failure>>,
    {
        let mut last_err = None;

        for attempt in 0..self.max_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(Failure::Fatal(e)) => return Err(e),
                Err(Failure::RateLimited(e)) => {
                    last_err = Some(e);
                    if attempt + 1 < self.max_attempts {
                        tokio::time::sleep(self.backoff_delay(attempt)).await;
                    }
                }
                Err(Failure::Transient(e)) => {
                    last_err = Some(e);
                    if attempt + 1 < self.max_attempts {
                        tokio::time::sleep(self.flat_delay).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("call failed after retries")))
    }
}

/// Map an HTTP status plus response body to a [`Failure`] class.
///
/// 429 is rate-limit, 5xx is transient, any other non-success status is
/// fatal (client errors do not improve on retry).
pub fn classify_status(status: reqwest::StatusCode, body: String, what: &str) -> Failure {
    let err = anyhow!("{} error {}: {}", what, status, body);
    if status.as_u16() == 429 {
        Failure::RateLimited(err)
    } else if status.is_server_error() {
        Failure::Transient(err)
    } else {
        Failure::Fatal(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(1),
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn succeeds_when_failures_below_budget() {
        for failures_before_success in 0..3u32 {
            let calls = AtomicU32::new(0);
            let policy = fast_policy(3);
            let result: Result<u32> = policy
                .run(|| {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < failures_before_success {
                            Err(Failure::RateLimited(anyhow!("429")))
                        } else {
                            Ok(n)
                        }
                    }
                })
                .await;
            assert!(
                result.is_ok(),
                "{} failures should fit a 3-attempt budget",
                failures_before_success
            );
        }
    }

    #[tokio::test]
    async fn unbroken_rate_limit_fails_after_exactly_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(3);
        let result: Result<()> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Failure::RateLimited(anyhow!("429"))) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_failure_stops_immediately() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(3);
        let result: Result<()> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Failure::Fatal(anyhow!("400 bad request"))) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy(3);
        let result: Result<u32> = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Failure::Transient(anyhow!("connection reset")))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn backoff_delays_are_monotonically_non_decreasing() {
        let policy = RetryPolicy::new(
            5,
            Duration::from_millis(100),
            Duration::from_millis(100),
        );
        let delays: Vec<Duration> = (0..4).map(|a| policy.backoff_delay(a)).collect();
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0], "backoff must not shrink: {:?}", delays);
        }
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(200));
        assert_eq!(delays[2], Duration::from_millis(400));
    }

    #[test]
    fn classify_status_triage() {
        let f = classify_status(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            "slow down".into(),
            "API",
        );
        assert!(matches!(f, Failure::RateLimited(_)));

        let f = classify_status(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            "oops".into(),
            "API",
        );
        assert!(matches!(f, Failure::Transient(_)));

        let f = classify_status(reqwest::StatusCode::BAD_REQUEST, "no".into(), "API");
        assert!(matches!(f, Failure::Fatal(_)));
    }
}
