use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Random extra delay added after every permit, sampled uniformly from `[min, max]`.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct Jitter {
    pub min: Duration,
    pub max: Duration,
}

impl Jitter {
    pub const NONE: Self = Self {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }

        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

/// Token bucket on the tokio clock.
///
/// Holds up to `burst` permits, refilled one per `interval`. Implemented as a virtual
/// scheduling instant (`next`) that advances by `interval` per permit: a caller waits until
/// `next - interval * (burst - 1)`. Waiting happens outside the lock, so concurrent callers
/// queue in arrival order without serialising their sleeps.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    burst: u32,
    jitter: Jitter,
    next: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration, burst: u32, jitter: Jitter) -> Self {
        Self {
            interval,
            burst: burst.max(1),
            jitter,
            next: Mutex::new(None),
        }
    }

    /// Limiter that never waits.
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO, 1, Jitter::NONE)
    }

    /// Wait for a permit, then for a jitter sample.
    pub async fn acquire(&self) {
        let wait = self.reserve(Instant::now()) + self.jitter.sample();

        if !wait.is_zero() {
            trace!(wait_ms = wait.as_millis() as u64, "rate limiter delaying request");
            tokio::time::sleep(wait).await;
        }
    }

    /// Claim the next slot, returning how long the caller must wait for it.
    fn reserve(&self, now: Instant) -> Duration {
        let mut next = self.next.lock();

        let scheduled = next.map_or(now, |next| next.max(now));
        *next = Some(scheduled + self.interval);

        let allowance = self.interval * (self.burst - 1);
        scheduled
            .saturating_duration_since(now)
            .saturating_sub(allowance)
    }
}
