//! Retry with exponential backoff for transient provider errors.

use crate::context::CancelToken;
use crate::error::ProviderError;
use std::thread;
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff_factor,
            ..Default::default()
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay after the given (0-indexed) failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out.
///
/// Returns the final result together with the number of attempts made.
/// No retry is started once `cancel` has fired; the last error is returned.
pub fn with_retry<T, F>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    label: &str,
    mut operation: F,
) -> (Result<T, ProviderError>, u32)
where
    F: FnMut() -> Result<T, ProviderError>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match operation() {
            Ok(value) => return (Ok(value), attempt),
            Err(e) => e,
        };

        if !error.is_retryable() || attempt >= max_attempts || cancel.check().is_some() {
            return (Err(error), attempt);
        }

        let delay = policy.delay_for_attempt(attempt - 1);
        log::warn!(
            "{label}: attempt {attempt}/{max_attempts} failed: {error}. Retrying in {:.1}s",
            delay.as_secs_f64()
        );
        thread::sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_delay_for_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), 2.0);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_capped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(5),
            ..RetryPolicy::new(10, Duration::from_secs(1), 10.0)
        };
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(5));
    }

    #[test]
    fn test_permanent_error_not_retried() {
        let calls = Cell::new(0);
        let (result, attempts) = with_retry(&fast(5), &CancelToken::new(), "vpc", || {
            calls.set(calls.get() + 1);
            Err::<(), _>(ProviderError::new("invalid cidr block"))
        });
        assert!(result.is_err());
        assert_eq!(attempts, 1);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_transient_error_eventually_succeeds() {
        let calls = Cell::new(0);
        let (result, attempts) = with_retry(&fast(3), &CancelToken::new(), "vpc", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(ProviderError::transient("throttled"))
            } else {
                Ok("vpc-1")
            }
        });
        assert_eq!(result.unwrap(), "vpc-1");
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_attempts_exhausted() {
        let (result, attempts) = with_retry(&fast(2), &CancelToken::new(), "vpc", || {
            Err::<(), _>(ProviderError::transient("throttled"))
        });
        assert!(result.unwrap_err().transient);
        assert_eq!(attempts, 2);
    }

    #[test]
    fn test_cancelled_stops_retrying() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let (result, attempts) = with_retry(&fast(5), &cancel, "vpc", || {
            Err::<(), _>(ProviderError::transient("throttled"))
        });
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
