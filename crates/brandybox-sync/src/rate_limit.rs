//! Token bucket limiting how fast new transfers start
//!
//! The server allows 600 requests per minute per account. The bucket
//! caps transfer *starts*, independent of how many workers are busy, so a
//! pool of fast small files cannot burst past that limit.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use brandybox_sync::clock::TokioClock;
//! use brandybox_sync::rate_limit::TokenBucket;
//!
//! # async fn example() {
//! let bucket = TokenBucket::new(10, 10.0, Arc::new(TokioClock));
//! bucket.acquire().await;
//! // ... start the transfer ...
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::clock::Clock;

/// Internal mutable state for the token bucket, protected by a Mutex.
#[derive(Debug)]
struct TokenBucketInner {
    /// Current number of available tokens (fractional for smooth refill)
    tokens: f64,
    /// Timestamp of the last refill calculation
    last_refill: Instant,
}

/// Token bucket rate limiter.
///
/// Tokens are consumed on each transfer start and refilled at a constant
/// rate. When no tokens are available, callers wait for refill.
pub struct TokenBucket {
    /// Maximum number of tokens in the bucket
    capacity: u32,
    /// Tokens added per second
    refill_rate: f64,
    inner: Mutex<TokenBucketInner>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("capacity", &self.capacity)
            .field("refill_rate", &self.refill_rate)
            .finish()
    }
}

impl TokenBucket {
    /// Creates a new `TokenBucket`; the bucket starts full.
    pub fn new(capacity: u32, refill_rate: f64, clock: Arc<dyn Clock>) -> Self {
        let capacity = capacity.max(1);
        let now = clock.now();
        Self {
            capacity,
            refill_rate,
            inner: Mutex::new(TokenBucketInner {
                tokens: f64::from(capacity),
                last_refill: now,
            }),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TokenBucketInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds the tokens earned since the last refill, capped at capacity.
    fn refill(&self, inner: &mut TokenBucketInner) {
        let now = self.clock.now();
        let elapsed_secs = now.saturating_duration_since(inner.last_refill).as_secs_f64();

        if elapsed_secs > 0.0 {
            let new_tokens = elapsed_secs * self.refill_rate;
            inner.tokens = (inner.tokens + new_tokens).min(f64::from(self.capacity));
            inner.last_refill = now;
        }
    }

    /// Takes one token if available, without waiting.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        self.refill(&mut inner);

        if inner.tokens >= 1.0 {
            inner.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Estimated wait until a token becomes available.
    pub fn time_until_available(&self) -> Duration {
        let mut inner = self.lock();
        self.refill(&mut inner);

        if inner.tokens >= 1.0 {
            Duration::ZERO
        } else if self.refill_rate > 0.0 {
            Duration::from_secs_f64((1.0 - inner.tokens) / self.refill_rate)
        } else {
            Duration::from_secs(3600)
        }
    }

    /// Returns the current number of available tokens (after refill).
    pub fn available_tokens(&self) -> f64 {
        let mut inner = self.lock();
        self.refill(&mut inner);
        inner.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Waits cooperatively until a token is available and takes it.
    pub async fn acquire(&self) {
        loop {
            if self.try_acquire() {
                return;
            }

            let wait = self.time_until_available().max(Duration::from_millis(10));
            debug!(
                wait_ms = wait.as_millis() as u64,
                "No transfer tokens available, waiting for refill"
            );
            self.clock.sleep(wait).await;
        }
    }
}
