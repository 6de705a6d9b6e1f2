//! Rate limiting for key-set fetches.
//!
//! A [`FetchRateLimiter`] is a token bucket that refills at a fixed number of
//! fetches per minute. It guards the outbound key-set endpoint: every cache
//! miss that would trigger a network fetch must first acquire a token.
//! Cache hits never touch the limiter.
//!
//! The bucket starts full, so a cold start can serve `per_minute` distinct
//! unknown key ids before throttling.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use crate::error::{AuthError, Result};

/// Configuration for a fetch rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRateConfig {
    /// Sustained fetches per minute; also the bucket capacity.
    per_minute: u32,
}

impl FetchRateConfig {
    /// Creates a config admitting `per_minute` fetches per minute.
    ///
    /// A value of zero is raised to one; [`AuthorizerConfig`](crate::AuthorizerConfig)
    /// already rejects zero at load time.
    #[must_use]
    pub fn per_minute(per_minute: u32) -> Self {
        Self { per_minute: per_minute.max(1) }
    }

    /// Returns the sustained rate in fetches per minute.
    #[must_use]
    pub fn rate(&self) -> u32 {
        self.per_minute
    }

    fn tokens_per_second(self) -> f64 {
        f64::from(self.per_minute) / 60.0
    }

    fn capacity(self) -> f64 {
        f64::from(self.per_minute)
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    config: FetchRateConfig,
}

impl BucketState {
    fn new(config: FetchRateConfig) -> Self {
        Self { tokens: config.capacity(), last_refill: Instant::now(), config }
    }

    /// Refills, then consumes one token or reports how long until one is available.
    fn try_acquire(&mut self) -> std::result::Result<(), Duration> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        let refill = elapsed.as_secs_f64() * self.config.tokens_per_second();
        self.tokens = (self.tokens + refill).min(self.config.capacity());
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / self.config.tokens_per_second()))
        }
    }
}

/// Snapshot of limiter counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchRateMetrics {
    /// Fetches admitted.
    pub allowed: u64,
    /// Fetches refused.
    pub rejected: u64,
}

/// Token-bucket limiter for outbound key-set fetches.
#[derive(Debug)]
pub struct FetchRateLimiter {
    bucket: Mutex<BucketState>,
    allowed: AtomicU64,
    rejected: AtomicU64,
}

impl FetchRateLimiter {
    /// Creates a full bucket.
    #[must_use]
    pub fn new(config: FetchRateConfig) -> Self {
        Self {
            bucket: Mutex::new(BucketState::new(config)),
            allowed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Acquires one fetch token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RateLimitExceeded`] with a `retry_after` hint when
    /// the bucket is empty.
    pub fn check(&self) -> Result<()> {
        let outcome = self.bucket.lock().try_acquire();
        match outcome {
            Ok(()) => {
                self.allowed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            Err(retry_after) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(AuthError::rate_limit_exceeded(retry_after))
            },
        }
    }

    /// Returns a snapshot of the limiter counters.
    #[must_use]
    pub fn metrics_snapshot(&self) -> FetchRateMetrics {
        FetchRateMetrics {
            allowed: self.allowed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
