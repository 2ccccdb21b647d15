//! Per-client token bucket rate limiting.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::RateLimitConfig;

/// Bucket count above which a new client triggers a sweep.
const MAX_TRACKED_CLIENTS: usize = 10_000;

/// Buckets untouched for this long are dropped even if never refilled.
const IDLE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl TokenBucket {
    fn new(max_tokens: u32, refill_rate: u32) -> Self {
        Self {
            tokens: f64::from(max_tokens),
            max_tokens: f64::from(max_tokens),
            refill_rate: f64::from(refill_rate),
            last_refill: Instant::now(),
        }
    }

    fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;
    }

    /// A full bucket holds no state a fresh one wouldn't, so it can go.
    fn is_evictable(&self, now: Instant) -> bool {
        let idle = now.saturating_duration_since(self.last_refill);
        if idle >= IDLE_TTL {
            return true;
        }
        let tokens = self.tokens + idle.as_secs_f64() * self.refill_rate;
        tokens >= self.max_tokens
    }

    fn time_until_token(&self) -> Duration {
        if self.tokens >= 1.0 || self.refill_rate <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.refill_rate)
        }
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Limited { retry_after: u64 },
}

/// Shared limiter keyed by client address.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<String, TokenBucket>,
    max_tracked: usize,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
            max_tracked: MAX_TRACKED_CLIENTS,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Take one token from `key`'s bucket.
    pub fn admit(&self, key: &str) -> Admission {
        if !self.config.enabled {
            return Admission::Allowed;
        }

        // Sweep before taking the entry guard; retain locks every shard.
        if self.buckets.len() >= self.max_tracked && !self.buckets.contains_key(key) {
            self.prune(Instant::now());
        }

        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.config.burst, self.config.requests_per_second));

        if bucket.try_acquire() {
            Admission::Allowed
        } else {
            Admission::Limited {
                retry_after: bucket.time_until_token().as_secs().max(1),
            }
        }
    }

    /// Drop buckets that are full again or idle past the TTL.
    fn prune(&self, now: Instant) {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| !bucket.is_evictable(now));
        tracing::debug!(
            evicted = before - self.buckets.len(),
            remaining = self.buckets.len(),
            "pruned rate limit buckets"
        );
    }

    #[cfg(test)]
    fn tracked_clients(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(rps: u32, burst: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            enabled: true,
            requests_per_second: rps,
            burst,
        })
    }

    #[test]
    fn burst_is_honoured_then_limited() {
        let limiter = limiter(1, 3);
        for _ in 0..3 {
            assert_eq!(limiter.admit("10.0.0.1"), Admission::Allowed);
        }
        assert!(matches!(limiter.admit("10.0.0.1"), Admission::Limited { retry_after } if retry_after >= 1));
    }

    #[test]
    fn clients_have_separate_buckets() {
        let limiter = limiter(1, 1);
        assert_eq!(limiter.admit("a"), Admission::Allowed);
        assert_eq!(limiter.admit("b"), Admission::Allowed);
        assert!(matches!(limiter.admit("a"), Admission::Limited { .. }));
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn refilled_buckets_are_evicted_once_the_map_is_full() {
        let mut limiter = limiter(1000, 1);
        limiter.max_tracked = 100;
        for i in 0..100 {
            assert_eq!(limiter.admit(&format!("10.0.0.{i}")), Admission::Allowed);
        }
        assert_eq!(limiter.tracked_clients(), 100);

        // 1000 tokens/s refills a one-token bucket well within this sleep.
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(limiter.admit("10.0.1.1"), Admission::Allowed);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn prune_keeps_clients_still_being_limited() {
        let limiter = limiter(1, 2);
        limiter.admit("busy");
        limiter.admit("busy");
        limiter.admit("quiet");

        limiter.prune(Instant::now());
        assert_eq!(limiter.tracked_clients(), 2);

        // 1.5s refills "quiet" (1 of 2 used) but not "busy" (2 of 2 used).
        limiter.prune(Instant::now() + Duration::from_millis(1500));
        assert_eq!(limiter.tracked_clients(), 1);
        assert!(matches!(limiter.admit("busy"), Admission::Limited { .. }));

        limiter.prune(Instant::now() + IDLE_TTL);
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn disabled_limiter_admits_everything() {
        let limiter = RateLimiter::new(RateLimitConfig::disabled());
        for _ in 0..1000 {
            assert_eq!(limiter.admit("a"), Admission::Allowed);
        }
        assert_eq!(limiter.tracked_clients(), 0);
    }
}
