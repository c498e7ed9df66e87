//! Bounded retry policies.
//!
//! Only recoverable errors are retried; fatal errors return immediately.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::error::OpsError;

/// Delay schedule between attempts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backoff {
    /// Same delay after every failed attempt.
    Fixed(Duration),
    /// `base`, then `2 * base`, `4 * base`, and so on.
    Exponential {
        /// Delay after the first failed attempt.
        base: Duration,
    },
}

/// Bounded attempt count plus backoff schedule.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Creates a policy. A ceiling of zero is treated as a single attempt.
    #[must_use]
    pub const fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: if max_attempts == 0 { 1 } else { max_attempts },
            backoff,
        }
    }

    /// A policy that tries once and never sleeps.
    #[must_use]
    pub const fn once() -> Self {
        Self::new(1, Backoff::Fixed(Duration::ZERO))
    }

    /// Total number of attempts allowed.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to observe after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base } => {
                let exponent = attempt.saturating_sub(1).min(31);
                base.saturating_mul(1_u32 << exponent)
            }
        }
    }

    /// Whether `err` warrants another attempt after attempt number `attempt`.
    #[must_use]
    pub const fn should_retry(&self, err: &OpsError, attempt: u32) -> bool {
        err.is_recoverable() && attempt < self.max_attempts
    }
}

/// Runs `operation` until it succeeds, fails fatally, or the policy is
/// exhausted.
///
/// # Errors
///
/// Returns the first fatal error, or the last recoverable error once the
/// ceiling is reached.
pub async fn retry_recoverable<T, F, Fut>(
    policy: RetryPolicy,
    name: &str,
    mut operation: F,
) -> Result<T, OpsError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OpsError>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if policy.should_retry(&err, attempt) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation = %name,
                    attempt,
                    max_attempts = policy.max_attempts(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "recoverable failure, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn timeout() -> OpsError {
        OpsError::HostTimeout {
            target: String::from("db-n1"),
            endpoint: String::from("centos@10.0.0.5:22"),
        }
    }

    #[test]
    fn exponential_backoff_doubles() {
        let policy = RetryPolicy::new(
            6,
            Backoff::Exponential {
                base: Duration::from_millis(10),
            },
        );
        let delays: Vec<_> = (1..=5).map(|n| policy.delay_for(n).as_millis()).collect();
        assert_eq!(delays, vec![10, 20, 40, 80, 160]);
    }

    #[test]
    fn zero_ceiling_means_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Backoff::Fixed(Duration::ZERO)).max_attempts(), 1);
    }

    #[tokio::test]
    async fn retries_recoverable_until_ceiling() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(3, Backoff::Fixed(Duration::ZERO));

        let result: Result<(), OpsError> =
            retry_recoverable(policy, "provision", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(timeout())
            })
            .await;

        assert_eq!(result, Err(timeout()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(3, Backoff::Fixed(Duration::ZERO));

        let result: Result<(), OpsError> = retry_recoverable(policy, "create", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(OpsError::AlreadyExists {
                target: String::from("db-n1"),
            })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(3, Backoff::Fixed(Duration::ZERO));

        let result = retry_recoverable(policy, "provision", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(timeout())
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
