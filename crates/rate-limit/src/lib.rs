//! Global rate limiter for upstream provider requests (§4.7/§5): a sliding-window
//! acquisition count, a bounded-concurrency semaphore, and a process-wide cooldown set by
//! an upstream 429. In-process rather than Redis-backed — see the workspace DESIGN.md for
//! why this gateway doesn't need a distributed limiter.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use governor::{Quota, RateLimiter as GovernorLimiter};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use config::RateLimitConfig;

/// Holds the concurrency permit for one in-flight upstream request; dropping it frees the
/// slot.
pub struct Admission {
    _permit: OwnedSemaphorePermit,
}

/// Sliding-window + concurrency-bounded limiter shared by all requests to one provider.
pub struct GlobalRateLimiter {
    window: GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>,
    concurrency: Arc<Semaphore>,
    cooldown_on_429: Duration,
    blocked_until_unix_ms: AtomicU64,
}

impl GlobalRateLimiter {
    /// Build a limiter from the provider's configured rate-limit section.
    pub fn new(config: &RateLimitConfig) -> Self {
        let requests = NonZeroU32::new(config.max_requests.max(1)).expect("max_requests.max(1) is nonzero");
        let quota = Quota::with_period(config.window / config.max_requests.max(1))
            .unwrap_or_else(|| Quota::per_second(requests))
            .allow_burst(requests);

        Self {
            window: GovernorLimiter::direct(quota),
            concurrency: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            cooldown_on_429: config.cooldown_on_429,
            blocked_until_unix_ms: AtomicU64::new(0),
        }
    }

    /// Wait for a concurrency slot and a sliding-window acquisition. If a prior upstream 429
    /// put the limiter in cooldown, wait that out first rather than failing fast (§8: "429
    /// sets the global block; subsequent acquires within the cooldown wait rather than fail").
    pub async fn acquire(&self) -> Admission {
        while let Some(remaining) = self.cooldown_remaining() {
            tokio::time::sleep(remaining).await;
        }

        let permit = self
            .concurrency
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore is never closed");

        self.window.until_ready().await;

        Admission { _permit: permit }
    }

    /// Record an upstream 429: block all further acquisitions for `cooldown_on_429`.
    pub fn set_blocked(&self) {
        let until = now_unix_ms() + self.cooldown_on_429.as_millis() as u64;
        self.blocked_until_unix_ms.store(until, Ordering::SeqCst);
        log::warn!("upstream 429 received, entering rate-limit cooldown for {:?}", self.cooldown_on_429);
    }

    fn cooldown_remaining(&self) -> Option<Duration> {
        let until = self.blocked_until_unix_ms.load(Ordering::SeqCst);
        if until == 0 {
            return None;
        }
        let now = now_unix_ms();
        if now >= until {
            return None;
        }
        Some(Duration::from_millis(until - now))
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RateLimitConfig {
        RateLimitConfig {
            max_requests: 5,
            window: Duration::from_secs(1),
            max_concurrency: 2,
            cooldown_on_429: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn admits_requests_under_the_limit() {
        let limiter = GlobalRateLimiter::new(&config());
        limiter.acquire().await;
    }

    #[tokio::test]
    async fn set_blocked_makes_acquire_wait_out_the_cooldown_instead_of_failing() {
        let limiter = GlobalRateLimiter::new(&config());
        limiter.set_blocked();

        let started = tokio::time::Instant::now();
        limiter.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(40));
    }
}
