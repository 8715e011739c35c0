//! Retry - Re-submit an operation while its error is known to be transient
//!
//! Used around creation requests that fail during eventual-consistency windows
//! (e.g. a freshly created IAM instance profile that has not propagated yet).
//! The retry deadline is independent of any provisioning wait that follows.

use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

/// Exponential backoff bounded by its own deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Give up once this much time has passed since the first attempt
    pub timeout: Duration,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Cap for the doubling delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `op`, retrying while `is_retryable` accepts the error and the policy's
/// deadline has not passed. Returns the last error otherwise.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    is_retryable: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let deadline = Instant::now() + policy.timeout;
    let mut attempt: u32 = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !is_retryable(&e) => return Err(e),
            Err(e) => {
                let now = Instant::now();
                if now >= deadline {
                    warn!("Giving up after {} attempt(s): {}", attempt + 1, e);
                    return Err(e);
                }
                let delay = policy.delay(attempt).min(deadline - now);
                debug!("Retryable error (attempt {}), retrying in {:?}: {}", attempt + 1, delay, e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_propagation_error(e: &String) -> bool {
        e.contains("instance profile does not exist")
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::new(Duration::from_secs(120))
            .with_delays(Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(3), Duration::from_secs(5));
        assert_eq!(policy.delay(40), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let mut calls = 0;
        let result = retry_with_backoff(
            &RetryPolicy::new(Duration::from_secs(120)),
            is_propagation_error,
            || {
                calls += 1;
                let attempt = calls;
                async move {
                    if attempt < 3 {
                        Err("InvalidParameterValueException: instance profile does not exist"
                            .to_string())
                    } else {
                        Ok("arn:aws:imagebuilder:us-east-1:123456789012:infrastructure-configuration/web")
                    }
                }
            },
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_returns_immediately() {
        let mut calls = 0;
        let result: Result<(), String> = retry_with_backoff(
            &RetryPolicy::new(Duration::from_secs(120)),
            is_propagation_error,
            || {
                calls += 1;
                async { Err("AccessDeniedException".to_string()) }
            },
        )
        .await;

        assert_eq!(result.unwrap_err(), "AccessDeniedException");
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_at_deadline() {
        let start = Instant::now();
        let result: Result<(), String> = retry_with_backoff(
            &RetryPolicy::new(Duration::from_secs(30)),
            is_propagation_error,
            || async { Err("instance profile does not exist".to_string()) },
        )
        .await;

        assert!(result.is_err());
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(40));
    }
}
