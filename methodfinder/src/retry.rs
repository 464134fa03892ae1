//! Retry policy for page fetches
//!
//! A small policy object (attempt bound, delay, backoff shape and which
//! failure classes are retryable) injected into the fetch path, so the
//! fetch implementation carries no retry logic of its own.

use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Backoff strategy between attempts
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Same delay before every retry
    #[default]
    Fixed,
    /// delay * attempt
    Linear,
    /// delay * 2^(attempt - 1)
    Exponential,
}

/// Coarse classification of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Connection failure, DNS failure, timeout
    Network,
    /// Server answered with a non-2xx status
    Status,
    /// Anything retrying cannot fix
    Fatal,
}

/// Errors that can tell the retry loop what kind of failure they are
pub trait Classify {
    fn failure_class(&self) -> FailureClass;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: BackoffStrategy,
    pub max_delay: Duration,
    pub retry_on_network: bool,
    pub retry_on_status: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
            backoff: BackoffStrategy::Fixed,
            max_delay: Duration::from_secs(10),
            retry_on_network: true,
            retry_on_status: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps; handy for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Delay to wait after the given failed attempt (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay = match self.backoff {
            BackoffStrategy::Fixed => self.delay,
            BackoffStrategy::Linear => self.delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempt - 1);
                self.delay.saturating_mul(factor)
            }
        };

        delay.min(self.max_delay)
    }

    pub fn is_retryable<E: Classify>(&self, error: &E) -> bool {
        match error.failure_class() {
            FailureClass::Network => self.retry_on_network,
            FailureClass::Status => self.retry_on_status,
            FailureClass::Fatal => false,
        }
    }

    /// Execute an async operation, retrying retryable failures until the
    /// attempt budget is spent. The last error is returned unchanged.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation(attempt).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !self.is_retryable(&e) {
                        debug!("Attempt {} failed with non-retryable error: {}", attempt, e);
                        return Err(e);
                    }
                    if attempt >= max_attempts {
                        warn!("All {} attempts exhausted, giving up: {}", max_attempts, e);
                        return Err(e);
                    }

                    let delay = self.delay_for(attempt);
                    debug!(
                        "Attempt {} failed ({}), retrying in {:?} with {:?} backoff",
                        attempt, e, delay, self.backoff
                    );
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
            }
        }
    }
}
