//! Retry policy for per-path transfers
//!
//! Attempts are retried with an exponentially growing delay (2 s, 4 s, ...
//! by default), capped at a maximum. A server-supplied `Retry-After` hint
//! replaces the computed delay for that attempt. All sleeping goes through
//! an injected [`Clock`].

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use brandybox_core::config::TransfersConfig;
use brandybox_core::ports::{FsError, TransportError};
use tracing::{info, warn};

use crate::clock::Clock;

/// Errors that can tell whether another attempt may succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Server-requested delay before the next attempt
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for TransportError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }

    fn retry_after(&self) -> Option<Duration> {
        TransportError::retry_after(self)
    }
}

impl Retryable for FsError {
    fn is_retryable(&self) -> bool {
        matches!(self, FsError::Io { .. } | FsError::Mismatch { .. })
    }
}

/// Attempt count and backoff shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl From<&TransfersConfig> for RetryPolicy {
    fn from(config: &TransfersConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_secs(config.retry_max_delay_secs),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let delay = match hint {
            Some(hint) => hint,
            None => {
                let exponent = attempt.saturating_sub(1).min(16);
                self.base_delay.saturating_mul(2u32.pow(exponent))
            }
        };
        delay.min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(
        &self,
        clock: &dyn Clock,
        operation: &str,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if attempt < self.max_attempts && err.is_retryable() => {
                    let delay = self.delay_for(attempt, err.retry_after());
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient error, retrying"
                    );
                    clock.sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
