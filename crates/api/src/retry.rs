//! Retry policy and transient-vs-permanent error classification.
//!
//! Only the streamed upload is retried; everything else either fails
//! the task immediately or is tolerated by the caller.

use std::time::Duration;

use rand::Rng;

use crate::ApiError;

/// Configuration for upload retries with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Extra attempts after the first (total attempts = max_retries + 1).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Backoff cap.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Calculates the delay before retry `retry` (0-based): doubles
    /// per retry, capped at `max_delay`, plus up to 10% jitter to
    /// avoid synchronized retry storms.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exp = retry.min(31);
        let base = self
            .initial_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay);
        let jitter = base.mul_f64(rand::thread_rng().gen_range(0.0..0.1));
        base + jitter
    }
}

/// Returns true for outcomes worth retrying: transport-level failures,
/// 5xx server errors, and 429 rate limits. Everything else is
/// permanent.
pub fn is_retryable(err: &ApiError) -> bool {
    match err {
        ApiError::Http(e) => !e.is_builder(),
        ApiError::Api { status, .. } => *status >= 500 || *status == 429,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }

    #[test]
    fn delay_doubles_with_jitter_bound() {
        let p = policy();
        // Base delays: 100ms, 200ms, 400ms, 800ms, 1.6s.
        for retry in 0..5u32 {
            let base = Duration::from_millis(100 * (1 << retry));
            for _ in 0..20 {
                let d = p.delay_for_retry(retry);
                assert!(d >= base, "retry {retry}: {d:?} below base {base:?}");
                assert!(
                    d <= base.mul_f64(1.1),
                    "retry {retry}: {d:?} above base+10% ({base:?})"
                );
            }
        }
    }

    #[test]
    fn delay_capped_at_max() {
        let p = policy();
        // 100ms * 2^10 would be ~102s; must cap at 2s (+10%).
        let d = p.delay_for_retry(10);
        assert!(d >= Duration::from_secs(2));
        assert!(d <= Duration::from_secs(2).mul_f64(1.1));
    }

    #[test]
    fn delay_large_retry_does_not_overflow() {
        let p = policy();
        let d = p.delay_for_retry(u32::MAX);
        assert!(d <= p.max_delay.mul_f64(1.1));
    }

    #[test]
    fn server_errors_are_retryable() {
        assert!(is_retryable(&ApiError::Api {
            status: 500,
            body: String::new()
        }));
        assert!(is_retryable(&ApiError::Api {
            status: 503,
            body: String::new()
        }));
        assert!(is_retryable(&ApiError::Api {
            status: 429,
            body: String::new()
        }));
    }

    #[test]
    fn client_errors_are_permanent() {
        assert!(!is_retryable(&ApiError::Api {
            status: 403,
            body: String::new()
        }));
        assert!(!is_retryable(&ApiError::Api {
            status: 404,
            body: String::new()
        }));
        assert!(!is_retryable(&ApiError::Api {
            status: 400,
            body: String::new()
        }));
    }

    #[test]
    fn non_http_errors_are_permanent() {
        assert!(!is_retryable(&ApiError::Auth("rejected".into())));
        assert!(!is_retryable(&ApiError::MissingField("mediaKey")));
        assert!(!is_retryable(&ApiError::Cancelled));
        assert!(!is_retryable(&ApiError::Io(std::io::Error::other("x"))));
    }
}
