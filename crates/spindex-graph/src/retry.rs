//! Generic retry executor for idempotent remote calls
//!
//! Independent of [`ApiSession`](crate::session::ApiSession): it wraps any
//! async operation whose error can be classified through [`Retryable`], and
//! is what the indexing client uses for its own transient failures.

use std::{fmt::Display, future::Future, time::Duration};

use spindex_core::config::RetryStrategyConfig;
use thiserror::Error;
use tracing::warn;

use crate::wait::CancellableWait;

/// Statuses retried by default
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

// ============================================================================
// RetryStrategy
// ============================================================================

/// Growth of the delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Always `interval`
    Constant,
    /// `interval * retry`
    Linear,
    /// `interval ^ retry` (in seconds)
    Exponential,
}

impl RetryStrategy {
    /// Delay after the `retry`-th failed attempt (1-based)
    pub fn delay(&self, interval: Duration, retry: u32) -> Duration {
        match self {
            Self::Constant => interval,
            Self::Linear => interval.saturating_mul(retry),
            Self::Exponential => {
                let exp = i32::try_from(retry).unwrap_or(i32::MAX);
                Duration::try_from_secs_f64(interval.as_secs_f64().powi(exp))
                    .unwrap_or(Duration::MAX)
            }
        }
    }
}

impl From<RetryStrategyConfig> for RetryStrategy {
    fn from(value: RetryStrategyConfig) -> Self {
        match value {
            RetryStrategyConfig::Constant => Self::Constant,
            RetryStrategyConfig::Linear => Self::Linear,
            RetryStrategyConfig::Exponential => Self::Exponential,
        }
    }
}

// ============================================================================
// Error classification
// ============================================================================

/// How a failed attempt should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// The call timed out; always retried until the budget runs out
    ConnectionTimeout,
    /// The remote API answered with an error status
    Api { status: u16 },
    /// Never retried
    Fatal,
}

/// Errors that can be classified for retry purposes
pub trait Retryable {
    fn retry_class(&self) -> RetryClass;
}

impl Retryable for reqwest::Error {
    fn retry_class(&self) -> RetryClass {
        if self.is_timeout() || self.is_connect() {
            RetryClass::ConnectionTimeout
        } else if let Some(status) = self.status() {
            RetryClass::Api {
                status: status.as_u16(),
            }
        } else {
            RetryClass::Fatal
        }
    }
}

/// Outcome of an operation that did not succeed
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Retrying stopped because the run was cancelled
    #[error("Retry interrupted by cancellation")]
    Interrupted,

    /// The last attempt's error, either fatal or with the budget exhausted
    #[error("{0}")]
    Failed(E),
}

// ============================================================================
// RetryExecutor
// ============================================================================

/// Executes an idempotent async operation with bounded retries
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    max_attempts: u32,
    interval: Duration,
    strategy: RetryStrategy,
    wait: CancellableWait,
}

impl RetryExecutor {
    /// Creates an executor retrying [`RETRYABLE_STATUSES`]
    pub fn new(
        max_attempts: u32,
        interval: Duration,
        strategy: RetryStrategy,
        wait: CancellableWait,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
            strategy,
            wait,
        }
    }

    /// Runs `op` until it succeeds, fails fatally, or the budget is spent
    ///
    /// # Errors
    /// [`RetryError::Interrupted`] when cancellation stopped the retries,
    /// otherwise [`RetryError::Failed`] with the last error.
    pub async fn execute<T, E, F, Fut>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut retry = 1;
        loop {
            if self.wait.is_cancelled() {
                return Err(RetryError::Interrupted);
            }

            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let retryable = match err.retry_class() {
                RetryClass::ConnectionTimeout => true,
                RetryClass::Api { status } => RETRYABLE_STATUSES.contains(&status),
                RetryClass::Fatal => false,
            };
            if !retryable || retry >= self.max_attempts {
                return Err(RetryError::Failed(err));
            }

            let delay = self.strategy.delay(self.interval, retry);
            warn!(
                retry,
                max_attempts = self.max_attempts,
                delay_secs = delay.as_secs_f64(),
                error = %err,
                "Retrying failed call"
            );
            if !self.wait.wait(delay).await {
                return Err(RetryError::Interrupted);
            }
            retry += 1;
        }
    }
}
