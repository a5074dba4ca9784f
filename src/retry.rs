//! Bounded retry with exponential backoff, jitter and a per-attempt timeout.
//!
//! Delays come from `backon`; the loop itself stays explicit so each attempt can be
//! raced against a timeout and a cancellation token.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. 0 behaves like 1.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1));
        if self.jitter { builder.with_jitter() } else { builder }
    }

    /// Wait before each attempt: zero for the first, backoff after.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + use<> {
        std::iter::once(Duration::ZERO).chain(self.backoff().build())
    }
}

/// How a single attempt failed.
#[derive(Debug)]
pub enum AttemptError<E> {
    Failed(E),
    TimedOut(Duration),
}

impl<E: fmt::Display> fmt::Display for AttemptError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Failed(e) => write!(f, "{e}"),
            AttemptError::TimedOut(after) => write!(f, "timed out after {after:?}"),
        }
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed; `last` is the final failure.
    Exhausted {
        attempts: usize,
        last: Option<AttemptError<E>>,
    },
    /// A non-retryable error ended the loop early.
    Rejected(E),
    Cancelled,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last: Some(last) } => {
                write!(f, "gave up after {attempts} attempts: {last}")
            }
            RetryError::Exhausted { attempts, last: None } => {
                write!(f, "gave up after {attempts} attempts")
            }
            RetryError::Rejected(e) => write!(f, "{e}"),
            RetryError::Cancelled => f.write_str("cancelled"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Run `op` until it succeeds, fails with a non-retryable error, runs out of attempts,
/// or `cancel` fires. `op` receives the 1-based attempt number.
pub async fn run_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Retryable + fmt::Display,
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = 0usize;
    let mut last = None;

    for delay in policy.delays() {
        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        attempts += 1;

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            outcome = tokio::time::timeout(policy.attempt_timeout, op(attempts)) => outcome,
        };

        match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if !e.is_retryable() => return Err(RetryError::Rejected(e)),
            Ok(Err(e)) => {
                warn!(attempt = attempts, error = %e, "attempt failed");
                last = Some(AttemptError::Failed(e));
            }
            Err(_) => {
                warn!(attempt = attempts, timeout = ?policy.attempt_timeout, "attempt timed out");
                last = Some(AttemptError::TimedOut(policy.attempt_timeout));
            }
        }
    }

    Err(RetryError::Exhausted { attempts, last })
}
