//! # Rate Limiting
//!
//! Token buckets backing the `RequestRateLimiter` route filter. Each key (route id plus
//! client address) owns a bucket holding at most `burst_capacity` tokens that refills
//! at `replenish_rate` tokens per second. A request takes one token; an empty bucket
//! means the request is rejected and the client gets blacklisted.
//!
//! ## Rust Concepts Used
//!
//! - `DashMap` shards the bucket map so unrelated keys never contend
//! - The entry API holds the shard lock for the read-refill-take sequence, which keeps
//!   a bucket from handing out the same token twice

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::routing::filter::RateLimitSpec;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Outcome of one acquire attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Whole tokens left after this request
    pub remaining: u32,
}

/// In-process token bucket limiter
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one token for `key`
    pub fn try_acquire(&self, key: &str, spec: RateLimitSpec) -> RateLimitDecision {
        self.try_acquire_at(key, spec, Instant::now())
    }

    fn try_acquire_at(&self, key: &str, spec: RateLimitSpec, now: Instant) -> RateLimitDecision {
        let capacity = f64::from(spec.burst_capacity);
        let mut bucket = self.buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: capacity,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * spec.replenish_rate).min(capacity);
        bucket.last_refill = now;

        let allowed = bucket.tokens >= 1.0;
        if allowed {
            bucket.tokens -= 1.0;
        }

        RateLimitDecision {
            allowed,
            remaining: bucket.tokens.floor() as u32,
        }
    }

    /// Drop buckets untouched for longer than `idle`
    pub fn evict_idle(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) < idle);
        before - self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(replenish_rate: f64, burst_capacity: u32) -> RateLimitSpec {
        RateLimitSpec {
            replenish_rate,
            burst_capacity,
        }
    }

    #[test]
    fn test_burst_then_reject() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        for expected_remaining in [2, 1, 0] {
            let decision = limiter.try_acquire_at("k", spec(1.0, 3), now);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }
        assert!(!limiter.try_acquire_at("k", spec(1.0, 3), now).allowed);
    }

    #[test]
    fn test_tokens_refill_over_time() {
        let limiter = RateLimiter::new();
        let start = Instant::now();

        assert!(limiter.try_acquire_at("k", spec(2.0, 1), start).allowed);
        assert!(!limiter.try_acquire_at("k", spec(2.0, 1), start).allowed);
        assert!(limiter
            .try_acquire_at("k", spec(2.0, 1), start + Duration::from_millis(600))
            .allowed);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new();
        let now = Instant::now();

        assert!(limiter.try_acquire_at("a", spec(1.0, 1), now).allowed);
        assert!(!limiter.try_acquire_at("a", spec(1.0, 1), now).allowed);
        assert!(limiter.try_acquire_at("b", spec(1.0, 1), now).allowed);
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn test_evict_idle() {
        let limiter = RateLimiter::new();
        limiter.try_acquire("a", spec(1.0, 1));
        assert_eq!(limiter.evict_idle(Duration::from_secs(60)), 0);
        assert_eq!(limiter.evict_idle(Duration::ZERO), 1);
        assert!(limiter.is_empty());
    }
}
