//! Waiter - Poll a remote resource until it leaves its pending statuses
//!
//! Asynchronously provisioned resources (image builds, Cloud Control requests)
//! report a status drawn from a fixed set. A [`StatusTable`] partitions that
//! set into pending, success and failure statuses, and [`Waiter::wait`] keeps
//! fetching a fresh snapshot until the status is terminal, the deadline
//! passes, or the caller cancels.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Category of a remote status value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// Keep polling
    Pending,
    /// Stop and return the snapshot
    Success,
    /// Stop and return the snapshot with an error
    Failure,
}

/// Partition of a resource's status values
#[derive(Debug, Clone, Copy)]
pub struct StatusTable {
    pub pending: &'static [&'static str],
    pub success: &'static [&'static str],
    pub failure: &'static [&'static str],
}

impl StatusTable {
    /// Classify a status value.
    ///
    /// Values outside the table are pending; the overall deadline still bounds
    /// the wait.
    pub fn classify(&self, status: &str) -> StatusClass {
        if self.success.contains(&status) {
            StatusClass::Success
        } else if self.failure.contains(&status) {
            StatusClass::Failure
        } else if self.pending.contains(&status) {
            StatusClass::Pending
        } else {
            warn!("Unknown status '{}', treating as pending", status);
            StatusClass::Pending
        }
    }
}

/// A snapshot of a remote resource that carries a status
pub trait Observed {
    /// Current status; `None` is treated as pending
    fn status(&self) -> Option<&str>;

    /// Human-readable reason reported alongside a failure status
    fn failure_reason(&self) -> Option<&str> {
        None
    }
}

/// Timing configuration for a wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitConfig {
    /// Overall deadline, measured from the start of the wait
    pub timeout: Duration,
    /// Delay before the first fetch
    pub initial_delay: Duration,
    /// Delay after the first pending fetch; doubles after each pending fetch
    pub poll_interval: Duration,
    /// Upper bound for the doubling interval
    pub max_interval: Duration,
}

impl WaitConfig {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Poll at a fixed interval
    pub fn with_fixed_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self.max_interval = interval;
        self
    }

    fn next_interval(&self, current: Duration) -> Duration {
        current
            .saturating_mul(2)
            .min(self.max_interval.max(self.poll_interval))
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20 * 60),
            initial_delay: Duration::ZERO,
            poll_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(30),
        }
    }
}

/// Reasons a wait ends without a success status
#[derive(Debug, thiserror::Error)]
pub enum WaitError<S> {
    /// The resource reached a failure status
    #[error("{reason}")]
    Failed {
        status: String,
        reason: String,
        snapshot: Box<S>,
    },

    /// The deadline passed; the remote resource may still be progressing
    #[error(
        "deadline exceeded after {timeout:?} (last status: {})",
        .last_status.as_deref().unwrap_or("unknown")
    )]
    Timeout {
        timeout: Duration,
        last_status: Option<String>,
    },

    /// The resource disappeared while being polled
    #[error("resource not found while waiting for a terminal status")]
    NotFound,

    #[error("wait cancelled")]
    Cancelled,
}

/// Polls a fetch operation until a terminal status
#[derive(Debug, Clone, Default)]
pub struct Waiter {
    config: WaitConfig,
}

impl Waiter {
    pub fn new(config: WaitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WaitConfig {
        &self.config
    }

    /// Wait until `fetch` reports a terminal status.
    ///
    /// `fetch` returns `Ok(Some(snapshot))` for a fresh snapshot, `Ok(None)`
    /// when the resource definitively does not exist, and `Err` for transient
    /// failures, which are logged and retried until the deadline.
    pub async fn wait<S, E, F, Fut>(
        &self,
        table: &StatusTable,
        cancel: &CancellationToken,
        mut fetch: F,
    ) -> Result<S, WaitError<S>>
    where
        S: Observed,
        E: fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<S>, E>>,
    {
        let deadline = Instant::now() + self.config.timeout;
        let mut interval = self.config.poll_interval;
        let mut last_status: Option<String> = None;
        let mut attempt: u32 = 0;

        if !self.config.initial_delay.is_zero() {
            pause(self.config.initial_delay.min(self.config.timeout), cancel).await?;
        }

        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WaitError::Cancelled),
                result = fetch() => result,
            };

            match result {
                Ok(Some(snapshot)) => {
                    let status = snapshot.status().map(str::to_string);
                    let class = status
                        .as_deref()
                        .map(|s| table.classify(s))
                        .unwrap_or(StatusClass::Pending);

                    match class {
                        StatusClass::Success => {
                            info!(
                                "Reached status {} after {} attempt(s)",
                                status.as_deref().unwrap_or_default(),
                                attempt
                            );
                            return Ok(snapshot);
                        }
                        StatusClass::Failure => {
                            let status = status.unwrap_or_default();
                            let reason = snapshot
                                .failure_reason()
                                .filter(|r| !r.is_empty())
                                .map(str::to_string)
                                .unwrap_or_else(|| format!("resource entered status {}", status));
                            info!("Reached failure status {}: {}", status, reason);
                            return Err(WaitError::Failed {
                                status,
                                reason,
                                snapshot: Box::new(snapshot),
                            });
                        }
                        StatusClass::Pending => {
                            debug!(
                                "Attempt {}: status {}",
                                attempt,
                                status.as_deref().unwrap_or("<none>")
                            );
                            last_status = status;
                        }
                    }
                }
                Ok(None) => return Err(WaitError::NotFound),
                Err(e) => {
                    warn!("Attempt {}: transient error fetching status: {}", attempt, e);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(WaitError::Timeout {
                    timeout: self.config.timeout,
                    last_status,
                });
            }

            pause(interval.min(deadline - now), cancel).await?;
            interval = self.config.next_interval(interval);
        }
    }
}

async fn pause<S>(delay: Duration, cancel: &CancellationToken) -> Result<(), WaitError<S>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(WaitError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
