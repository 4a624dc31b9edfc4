//! Retry envelope for stock transactions.
//!
//! The whole transaction is the unit of retry: each attempt begins a fresh
//! transaction, and a failed attempt has already rolled back by the time the
//! next one starts. Only errors whose [`StockError::transient_kind`] is `Some`
//! are retried.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::RetrySettings;
use crate::error::StockError;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays (1.0 = fixed).
    pub multiplier: f64,
    /// Randomise each delay within `[delay, delay * multiplier]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(100))
    }
}

impl RetryPolicy {
    /// Exponential backoff, multiplier 2, with jitter.
    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Create a policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Create a policy with a single attempt.
    pub fn no_retry() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Delay before the attempt following failed attempt `attempt` (1-indexed),
    /// before jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let exp = self.multiplier.max(1.0).powi(attempt as i32 - 1);
        Duration::from_millis((base_ms * exp).min(max_ms) as u64)
    }

    /// [`Self::delay_for_attempt`] with jitter applied, so concurrent losers
    /// of the same race do not retry in lockstep.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor = rand::rng().random_range(1.0..=self.multiplier.max(1.0));
        delay.mul_f64(factor).min(self.max_delay)
    }

    /// Check if another attempt is allowed after `attempt` attempts.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Policies for the two mutating entry points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicies {
    /// Batch apply and order transitions.
    pub batch: RetryPolicy,
    /// Single-key stock-take adjustment.
    pub adjust: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            batch: RetryPolicy::exponential(3, Duration::from_millis(100)),
            adjust: RetryPolicy::exponential(3, Duration::from_millis(50)),
        }
    }
}

impl From<&RetrySettings> for RetryPolicies {
    fn from(settings: &RetrySettings) -> Self {
        let policy = |base_ms: u64| RetryPolicy {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            multiplier: settings.multiplier,
            jitter: settings.jitter,
        };
        Self {
            batch: policy(settings.batch_base_delay_ms),
            adjust: policy(settings.adjust_base_delay_ms),
        }
    }
}

/// Run `attempt_fn` until it succeeds, fails with a non-transient error, or
/// the policy runs out of attempts.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut attempt_fn: F,
) -> Result<T, StockError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StockError>>,
{
    let mut attempt = 1;
    loop {
        let err = match attempt_fn().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        let Some(kind) = err.transient_kind() else {
            return Err(err);
        };

        if !policy.should_retry(attempt) {
            error!(operation, attempt, %kind, error = %err, "retries exhausted");
            return Err(StockError::RetryExhausted {
                operation,
                attempts: attempt,
                kind,
                message: err.to_string(),
            });
        }

        let delay = policy.jittered_delay(attempt);
        warn!(
            operation,
            attempt,
            %kind,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{StoreError, TransientKind};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient(kind: TransientKind) -> StockError {
        StockError::Store(StoreError::Transient {
            kind,
            message: "simulated".into(),
        })
    }

    #[test]
    fn exponential_backoff_calculates_correctly() {
        let policy = RetryPolicy {
            jitter: false,
            max_delay: Duration::from_secs(10),
            ..RetryPolicy::exponential(5, Duration::from_millis(100))
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn jitter_stays_between_delay_and_next_delay() {
        let policy = RetryPolicy::exponential(3, Duration::from_millis(100));
        for _ in 0..100 {
            let delay = policy.jittered_delay(2);
            assert!(delay >= Duration::from_millis(200), "{delay:?}");
            assert!(delay <= Duration::from_millis(400), "{delay:?}");
        }
    }

    #[test]
    fn max_delay_caps_backoff() {
        let policy = RetryPolicy {
            max_delay: Duration::from_millis(150),
            ..RetryPolicy::exponential(5, Duration::from_millis(100))
        };
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(150));
        assert!(policy.jittered_delay(4) <= Duration::from_millis(150));
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy::fixed(3, Duration::ZERO);
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1));

        let result = retry_transient(&policy, "test", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transient(TransientKind::UniqueViolation))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_reports_attempts_and_kind() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1));

        let err = retry_transient(&policy, "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(transient(TransientKind::LockNotAvailable))
        })
        .await
        .unwrap_err();

        match err {
            StockError::RetryExhausted { attempts, kind, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(kind, TransientKind::LockNotAvailable);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn business_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1));

        let err = retry_transient(&policy, "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(StockError::Conflict("insufficient stock".into()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, StockError::Conflict(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
