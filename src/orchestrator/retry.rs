//! Bounded retry with backoff
//!
//! Every phase retries through [`retry_with_backoff`] with its own policy and
//! a fresh attempt counter. At most `max_retries + 1` attempts are made.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use super::network::NetworkError;
use crate::error::Error;

/// Delay before retry `n` (1-based), given the base delay
pub type BackoffFn = fn(Duration, u32) -> Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff: BackoffFn,
}

impl RetryPolicy {
    /// `base * 2^(n-1)`, saturating, no cap
    pub fn exponential(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff: exponential_backoff,
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::exponential(0, Duration::ZERO)
    }

    pub fn with_backoff(mut self, backoff: BackoffFn) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay scheduled after failed attempt `n`
    pub fn delay_for(&self, n: u32) -> Duration {
        (self.backoff)(self.base_delay, n)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

fn exponential_backoff(base: Duration, n: u32) -> Duration {
    let factor = 2u32.checked_pow(n.saturating_sub(1)).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(Duration::MAX)
}

/// Whether a failure is worth another attempt
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for NetworkError {
    fn is_retryable(&self) -> bool {
        NetworkError::is_retryable(self)
    }
}

impl Retryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Why a retried operation gave up
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error
    Exhausted { attempts: u32, last: E },
    /// An attempt failed with an error that is not retried
    Aborted { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Aborted { attempts, .. } => *attempts,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted { error, .. } => error,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last } => {
                write!(f, "gave up after {} attempt(s): {}", attempts, last)
            }
            RetryError::Aborted { attempts, error } => {
                write!(f, "aborted on attempt {}: {}", attempts, error)
            }
        }
    }
}

/// Run `op(attempt)` until it succeeds, fails permanently or runs out of retries
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + fmt::Display,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    info!(phase = label, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if !error.is_retryable() => {
                warn!(phase = label, attempt, %error, "attempt failed, not retrying");
                return Err(RetryError::Aborted {
                    attempts: attempt,
                    error,
                });
            }
            Err(error) if attempt >= max_attempts => {
                warn!(phase = label, attempt, %error, "attempt failed, retries exhausted");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }
            Err(error) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    phase = label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
