//! Provider-call rate limiting.
//!
//! Serializes outbound LLM calls through a single-permit semaphore and
//! enforces a minimum spacing between call starts. The permit is held for
//! the duration of the provider call, so at most one request is in flight
//! at a time.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, Instant};

/// Limits the rate and concurrency of outbound provider calls.
#[derive(Debug)]
pub struct RateLimiter {
    /// Single permit: at most one call in flight.
    semaphore: Arc<Semaphore>,
    /// Minimum spacing between consecutive call starts.
    min_interval: Duration,
    /// Start time of the most recent permitted call.
    last_call: Mutex<Option<Instant>>,
}

/// A permit to make one provider call. Held for the call's duration;
/// dropping it releases the in-flight slot.
#[derive(Debug)]
pub struct RatePermit {
    _permit: OwnedSemaphorePermit,
}

impl RateLimiter {
    /// Create a limiter with an explicit minimum interval between calls.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Create a limiter from a calls-per-minute budget.
    ///
    /// A budget of 30 calls per minute yields a 2 second minimum spacing.
    /// Budgets of zero are clamped to one call per minute.
    pub fn from_calls_per_minute(calls_per_minute: u32) -> Self {
        let cpm = calls_per_minute.max(1);
        Self::new(Duration::from_millis(60_000 / u64::from(cpm)))
    }

    /// Get the configured minimum spacing between calls.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Acquire permission to make one call, waiting as long as needed.
    ///
    /// Blocks until no other call is in flight, then until the minimum
    /// spacing from the previous call start has elapsed. Waiters are
    /// served in acquisition order.
    pub async fn acquire(&self) -> RatePermit {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("rate limiter semaphore closed unexpectedly");

        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last_call = Some(Instant::now());

        RatePermit { _permit: permit }
    }
}
