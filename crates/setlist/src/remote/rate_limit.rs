//! Token bucket limiting how fast requests leave the coordinator

use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::stream::lock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Burst size
    pub capacity: u32,
    pub refill_per_sec: f64,
    /// Longest a caller waits for a token before being rejected
    pub max_wait_ms: u64,
}

/// Fastest accepted refill rate
pub const MAX_REFILL_PER_SEC: f64 = 10_000.0;

impl RateLimitConfig {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.capacity > 0, "rate_limit.capacity must be positive");
        anyhow::ensure!(
            self.refill_per_sec.is_finite()
                && (0.0..=MAX_REFILL_PER_SEC).contains(&self.refill_per_sec),
            "rate_limit.refill_per_sec must be between 0 and {MAX_REFILL_PER_SEC}"
        );
        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_per_sec: 5.0,
            max_wait_ms: 2_000,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    updated_at: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let tokens = f64::from(config.capacity);
        Self {
            config,
            bucket: Mutex::new(Bucket {
                tokens,
                updated_at: Instant::now(),
            }),
        }
    }

    /// Take one token, sleeping until one is available.
    ///
    /// Returns false without taking a token when the wait would exceed
    /// `max_wait_ms`.
    pub async fn acquire(&self) -> bool {
        let wait = match self.reserve() {
            Some(wait) => wait,
            None => return false,
        };
        if !wait.is_zero() {
            debug!("[RateLimiter] waiting {:?} for a token", wait);
            tokio::time::sleep(wait).await;
        }
        true
    }

    /// Reserve a token now, returning how long the caller must wait before
    /// using it. Reservations beyond `max_wait_ms` are refused.
    fn reserve(&self) -> Option<Duration> {
        let mut bucket = lock(&self.bucket);
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.updated_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.config.refill_per_sec)
            .min(f64::from(self.config.capacity));
        bucket.updated_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Some(Duration::ZERO);
        }
        if self.config.refill_per_sec <= 0.0 {
            return None;
        }
        let wait = match Duration::try_from_secs_f64((1.0 - bucket.tokens) / self.config.refill_per_sec) {
            Ok(wait) => wait,
            Err(err) => {
                warn!("[RateLimiter] refill too slow to wait for: {}", err);
                return None;
            }
        };
        if wait > Duration::from_millis(self.config.max_wait_ms) {
            return None;
        }
        // Borrow against future refill; later callers queue behind this one
        bucket.tokens -= 1.0;
        Some(wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(capacity: u32, refill_per_sec: f64, max_wait_ms: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            capacity,
            refill_per_sec,
            max_wait_ms,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_wait_for_refill() {
        let limiter = limiter(2, 1.0, 5_000);
        let start = Instant::now();

        assert!(limiter.acquire().await);
        assert!(limiter.acquire().await);
        assert_eq!(start.elapsed(), Duration::ZERO);

        assert!(limiter.acquire().await);
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_when_wait_exceeds_maximum() {
        let limiter = limiter(1, 0.5, 500);

        assert!(limiter.acquire().await);
        assert!(!limiter.acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanishing_refill_rate_rejects_instead_of_waiting() {
        let limiter = limiter(1, 1e-30, u64::MAX);

        assert!(limiter.acquire().await);
        assert!(!limiter.acquire().await);
    }

    #[test]
    fn test_validate_bounds() {
        let valid = RateLimitConfig::default();
        assert!(valid.validate().is_ok());

        for invalid in [
            RateLimitConfig { capacity: 0, ..valid.clone() },
            RateLimitConfig { refill_per_sec: f64::NAN, ..valid.clone() },
            RateLimitConfig { refill_per_sec: f64::INFINITY, ..valid.clone() },
            RateLimitConfig { refill_per_sec: -1.0, ..valid.clone() },
            RateLimitConfig { refill_per_sec: 1e9, ..valid.clone() },
        ] {
            assert!(invalid.validate().is_err(), "{invalid:?} accepted");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_refill_over_time() {
        let limiter = limiter(1, 1.0, 0);

        assert!(limiter.acquire().await);
        assert!(!limiter.acquire().await);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.acquire().await);
    }
}
