//! Bounded polling of asynchronous conditions
//!
//! Every wait in the harness goes through [`eventually`]: namespace and CRD
//! propagation, dependent service readiness, post-test cleanup.
//!
//! # Example
//!
//! ```ignore
//! use operator_harness::eventually::{eventually, Check};
//! use std::time::Duration;
//!
//! eventually("statefulset/postgresql-db", || async {
//!     let sts = api.get("postgresql-db").await?;
//!     Ok::<_, kube::Error>(Check::from(ready_replicas(&sts) == 1))
//! })
//! .interval(Duration::from_millis(500))
//! .timeout(Duration::from_secs(360))
//! .ignore_errors()
//! .await_condition()
//! .await?;
//! ```

use crate::wait::WaitError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Default polling interval
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Default timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(360);

/// Result of a single evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// The condition holds
    Ready,
    /// The condition does not hold yet; carries the observed state
    Pending(String),
}

impl From<bool> for Check {
    fn from(ready: bool) -> Self {
        if ready {
            Check::Ready
        } else {
            Check::Pending("condition returned false".to_string())
        }
    }
}

/// Error type for eventually operations
#[derive(Debug, thiserror::Error)]
pub enum ConditionError {
    #[error("{0}")]
    Timeout(#[from] WaitError),

    #[error("condition for {resource} failed on attempt {attempt}: {reason}")]
    CheckFailed {
        resource: String,
        attempt: u32,
        reason: String,
    },
}

/// Builder for an eventually check
pub struct Eventually<F> {
    resource: String,
    condition: F,
    timeout: Duration,
    interval: Duration,
    /// `None` waits one interval before the first evaluation
    delay: Option<Duration>,
    ignore_errors: bool,
}

/// Create an eventually check that retries until the condition is ready
///
/// `resource` names what is being waited on and appears in errors.
/// Defaults: 360s timeout, 500ms interval, errors abort. The first
/// evaluation happens one interval after the start, so a condition that
/// holds on evaluation k resolves at k * interval.
pub fn eventually<F, Fut, E>(resource: impl Into<String>, condition: F) -> Eventually<F>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Check, E>>,
    E: Display,
{
    Eventually {
        resource: resource.into(),
        condition,
        timeout: DEFAULT_TIMEOUT,
        interval: DEFAULT_INTERVAL,
        delay: None,
        ignore_errors: false,
    }
}

impl<F, Fut, E> Eventually<F>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Check, E>>,
    E: Display,
{
    /// Set the timeout duration
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the polling interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Wait this long before the first evaluation instead of one interval
    ///
    /// `Duration::ZERO` evaluates immediately.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Treat evaluation errors as "not ready yet"
    pub fn ignore_errors(mut self) -> Self {
        self.ignore_errors = true;
        self
    }

    /// Apply an interval/timeout pair
    pub fn timings(self, timings: crate::config::Timings) -> Self {
        self.interval(timings.interval).timeout(timings.timeout)
    }

    /// Run the check, retrying until ready or timeout
    ///
    /// Returns the number of evaluations it took.
    pub async fn await_condition(mut self) -> Result<u32, ConditionError> {
        let start = Instant::now();
        let mut attempts = 0u32;
        let mut last_state = String::from("not evaluated");

        let delay = self.delay.unwrap_or(self.interval).min(self.timeout);
        if !delay.is_zero() {
            sleep(delay).await;
        }

        loop {
            attempts += 1;

            match (self.condition)().await {
                Ok(Check::Ready) => {
                    debug!(
                        resource = %self.resource,
                        attempts = attempts,
                        elapsed = ?start.elapsed(),
                        "Condition met"
                    );
                    return Ok(attempts);
                }
                Ok(Check::Pending(state)) => last_state = state,
                Err(e) if self.ignore_errors => {
                    debug!(resource = %self.resource, error = %e, "Ignoring check error");
                    last_state = format!("error: {e}");
                }
                Err(e) => {
                    return Err(ConditionError::CheckFailed {
                        resource: self.resource,
                        attempt: attempts,
                        reason: e.to_string(),
                    });
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                return Err(WaitError::new(self.resource, self.timeout, elapsed)
                    .with_state(last_state)
                    .with_attempts(attempts)
                    .into());
            }

            // Clamp so the final evaluation lands on the deadline
            sleep(self.interval.min(self.timeout - elapsed)).await;
        }
    }
}
