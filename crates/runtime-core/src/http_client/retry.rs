//! Retry policy for the resilient HTTP client (spec §4.1 "Retry policy").
//!
//! Up to `max_retries` re-attempts; exponential backoff doubling from
//! `wait_min`, capped at `wait_max`, with ±25% jitter. Retries are
//! interruptible by context cancellation — callers pass a
//! [`crate::context::RequestContext`] deadline check into [`should_wait`].

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub wait_min: Duration,
    pub wait_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            wait_min: Duration::from_millis(100),
            wait_max: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff to wait before attempt number `attempt` (1-indexed: the wait
    /// before the *second* attempt is `backoff(1)`).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.wait_min.as_millis().max(1) as u64 * 2u64.saturating_pow(attempt.saturating_sub(1));
        let capped = exp.min(self.wait_max.as_millis() as u64);
        let jitter_frac = rand::thread_rng().gen_range(-0.25..=0.25);
        let jittered = (capped as f64) * (1.0 + jitter_frac);
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

/// Whether a status code should be retried per spec §4.1: 5xx except 501;
/// 4xx never retried.
pub fn is_retryable_status(status: u16) -> bool {
    (500..600).contains(&status) && status != 501
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            wait_min: Duration::from_millis(10),
            wait_max: Duration::from_millis(30),
        };
        // attempt 1 ~10ms, attempt 2 ~20ms, attempt 3+ capped at 30ms, all ±25%.
        let b1 = policy.backoff(1).as_millis();
        let b3 = policy.backoff(3).as_millis();
        assert!(b1 <= 13 && b1 >= 7, "b1={b1}");
        assert!(b3 <= 38 && b3 >= 22, "b3={b3}");
    }

    #[test]
    fn status_retry_rules() {
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(501));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(400));
    }
}
