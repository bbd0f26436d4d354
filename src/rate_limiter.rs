//! Token-bucket rate limiter guarding outbound data-loader starts.
//!
//! Tokens refill continuously at `rate` tokens/sec up to `burst` capacity.
//! `acquire` either succeeds immediately (token available) or computes the
//! wait until one will be, so the pipeline actor can schedule a start
//! without busy-waiting or blocking other work.

use std::time::{Duration, Instant};

/// Default sustained rate, tokens/sec.
pub const DEFAULT_RATE: f64 = 80.0;
/// Default burst capacity.
pub const DEFAULT_BURST: f64 = 25.0;

pub struct TokenBucket {
    rate: f64,
    burst: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate: f64, burst: f64) -> Self {
        Self { rate, burst, tokens: burst, last_refill: Instant::now() }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.last_refill = now;
    }

    /// Attempt to take one token right now. Returns `true` on success.
    pub fn try_acquire(&mut self) -> bool {
        self.refill(Instant::now());
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// How long the caller should wait before a `try_acquire` would
    /// succeed, assuming no other caller consumes a token in the meantime.
    pub fn time_until_next_token(&mut self) -> Duration {
        self.refill(Instant::now());
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - self.tokens) / self.rate)
        }
    }
}

impl Default for TokenBucket {
    fn default() -> Self {
        Self::new(DEFAULT_RATE, DEFAULT_BURST)
    }
}

/// Async wrapper around [`TokenBucket`] serializing acquisition behind a
/// mutex, for callers outside the single-threaded pipeline actor (e.g. the
/// default `DataLoader`, which may be invoked from multiple tokio tasks).
pub struct RateLimiter {
    bucket: parking_lot::Mutex<TokenBucket>,
}

impl RateLimiter {
    pub fn new(rate: f64, burst: f64) -> Self {
        Self { bucket: parking_lot::Mutex::new(TokenBucket::new(rate, burst)) }
    }

    /// Resolve once a token is available, sleeping between polls as needed.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock();
                if bucket.try_acquire() {
                    return;
                }
                bucket.time_until_next_token()
            };
            tokio::time::sleep(wait).await;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE, DEFAULT_BURST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_throttle() {
        let mut bucket = TokenBucket::new(10.0, 3.0);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_for_refill() {
        let limiter = RateLimiter::new(10.0, 1.0);
        limiter.acquire().await;
        let start = tokio::time::Instant::now();
        limiter.acquire().await;
        assert!(tokio::time::Instant::now() >= start);
    }
}
