use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::retry::random_up_to;

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitPolicy {
    pub base_delay: Duration,
    pub jitter: Duration,
    pub tier1_failures: u32,
    pub tier1_factor: f64,
    pub tier2_failures: u32,
    pub tier2_factor: f64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(300),
            jitter: Duration::from_millis(300),
            tier1_failures: 5,
            tier1_factor: 1.3,
            tier2_failures: 10,
            tier2_factor: 2.0,
        }
    }
}

/// Enforces a minimum spacing between outbound requests across all workers.
///
/// The spacing widens as failures accumulate. `acquire` holds the lock for
/// the whole wait, so callers are released one at a time.
#[derive(Debug)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    last_call: Mutex<Option<Instant>>,
    failures: AtomicU32,
    calls: AtomicU64,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            last_call: Mutex::new(None),
            failures: AtomicU32::new(0),
            calls: AtomicU64::new(0),
        }
    }

    pub fn acquire(&self) {
        let mut last_call = self.last_call.lock();
        let spacing = self.current_delay() + random_up_to(self.policy.jitter);
        if let Some(previous) = *last_call {
            let since = previous.elapsed();
            if since < spacing {
                thread::sleep(spacing - since);
            }
        }
        *last_call = Some(Instant::now());
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        let _ = self
            .failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |count| {
                Some(count.saturating_sub(1))
            });
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Spacing for the current failure tier, jitter excluded.
    pub fn current_delay(&self) -> Duration {
        let failures = self.failures();
        let factor = if failures > self.policy.tier2_failures {
            self.policy.tier2_factor
        } else if failures > self.policy.tier1_failures {
            self.policy.tier1_factor
        } else {
            1.0
        };
        self.policy.base_delay.mul_f64(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_ms: u64) -> RateLimitPolicy {
        RateLimitPolicy {
            base_delay: Duration::from_millis(base_ms),
            jitter: Duration::ZERO,
            ..RateLimitPolicy::default()
        }
    }

    #[test]
    fn delay_escalates_through_tiers() {
        let limiter = RateLimiter::new(policy(100));
        assert_eq!(limiter.current_delay(), Duration::from_millis(100));
        for _ in 0..6 {
            limiter.record_failure();
        }
        assert_eq!(limiter.current_delay(), Duration::from_millis(130));
        for _ in 0..5 {
            limiter.record_failure();
        }
        assert_eq!(limiter.current_delay(), Duration::from_millis(200));
    }

    #[test]
    fn success_decays_failures_without_underflow() {
        let limiter = RateLimiter::new(policy(10));
        limiter.record_failure();
        limiter.record_success();
        limiter.record_success();
        assert_eq!(limiter.failures(), 0);
    }

    #[test]
    fn first_acquire_does_not_wait() {
        let limiter = RateLimiter::new(policy(500));
        let started = Instant::now();
        limiter.acquire();
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(limiter.calls(), 1);
    }
}
