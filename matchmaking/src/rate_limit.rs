//! Token-bucket rate limiter for outbound model calls.
//!
//! Capacity `N` per rolling 60-second window with continuous refill:
//!
//! ```text
//! tokens = min(N, tokens + elapsed_secs * N / 60)
//! ```
//!
//! `acquire()` suspends only the calling task until a token is available.
//! All bucket state lives behind one mutex that is never held across an
//! `.await`, so waiting callers do not block each other's refill math.

use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// Refill window for the configured capacity.
const WINDOW: Duration = Duration::from_secs(60);

/// Error for limiter misconfiguration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate limiter capacity must be > 0 (got {0})")]
    ZeroCapacity(u32),
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket gate bounding calls per minute.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    per_second: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter allowing `per_minute` acquisitions per rolling minute.
    ///
    /// The bucket starts full, so the first `per_minute` calls pass
    /// immediately.
    pub fn per_minute(per_minute: u32) -> Result<Self, RateLimitError> {
        if per_minute == 0 {
            return Err(RateLimitError::ZeroCapacity(per_minute));
        }
        let capacity = per_minute as f64;
        Ok(Self {
            capacity,
            per_second: capacity / WINDOW.as_secs_f64(),
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        })
    }

    /// Configured capacity per window.
    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    /// Wait until a token is available, then take it.
    pub async fn acquire(&self) {
        loop {
            let wait = match self.take_or_wait() {
                None => return,
                Some(wait) => wait,
            };
            debug!(wait_ms = wait.as_millis() as u64, "rate limiter waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Take a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.take_or_wait().is_none()
    }

    /// Tokens currently available (fractional).
    pub fn available(&self) -> f64 {
        let mut bucket = self.lock();
        self.refill(&mut bucket, Instant::now());
        bucket.tokens
    }

    /// Takes a token and returns `None`, or returns how long until one refills.
    fn take_or_wait(&self) -> Option<Duration> {
        let mut bucket = self.lock();
        self.refill(&mut bucket, Instant::now());
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return None;
        }
        let deficit = 1.0 - bucket.tokens;
        // Round up to the timer granularity so the next check sees a full token.
        let secs = deficit / self.per_second;
        Some(Duration::from_secs_f64(secs).max(Duration::from_millis(1)))
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.per_second).min(self.capacity);
        bucket.last_refill = now;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bucket> {
        // The bucket is updated in one step, so a poisoned guard still holds valid state.
        self.bucket.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_zero_capacity_rejected() {
        let err = RateLimiter::per_minute(0).unwrap_err();
        assert_eq!(err, RateLimitError::ZeroCapacity(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_available_immediately() {
        let limiter = RateLimiter::per_minute(5).unwrap();
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sixth_call_waits_for_refill() {
        let limiter = RateLimiter::per_minute(5).unwrap();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        let start = Instant::now();
        limiter.acquire().await;
        let waited = start.elapsed();
        // One token refills every 12 seconds at 5/min.
        assert!(waited >= Duration::from_secs(11), "waited {:?}", waited);
        assert!(waited <= Duration::from_secs(13), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_windows_take_a_minute() {
        let limiter = Arc::new(RateLimiter::per_minute(4).unwrap());
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.acquire().await }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_caps_at_capacity() {
        let limiter = RateLimiter::per_minute(3).unwrap();
        limiter.acquire().await;
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!((limiter.available() - 3.0).abs() < 1e-9);
    }
}
