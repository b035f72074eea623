//! Time source for delays
//!
//! Retry backoff and the rate limiter never call `tokio::time` directly;
//! they go through a [`Clock`] so tests can drive time by hand.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Monotonic time and sleeping
#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// The real clock, backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait::async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Default)]
struct ManualClockInner {
    offset: Duration,
    sleeps: Vec<Duration>,
}

/// A clock that only moves when something sleeps on it
///
/// Every `sleep` advances the clock by the requested duration immediately
/// and is recorded, so tests can assert on the exact backoff sequence.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    inner: Arc<Mutex<ManualClockInner>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            inner: Arc::new(Mutex::new(ManualClockInner::default())),
        }
    }

    /// Moves the clock forward without recording a sleep
    pub fn advance(&self, duration: Duration) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.offset += duration;
        }
    }

    /// Every duration slept so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner
            .lock()
            .map(|inner| inner.sleeps.clone())
            .unwrap_or_default()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = self.inner.lock().map(|i| i.offset).unwrap_or_default();
        self.origin + offset
    }

    async fn sleep(&self, duration: Duration) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.offset += duration;
            inner.sleeps.push(duration);
        }
        tokio::task::yield_now().await;
    }
}
