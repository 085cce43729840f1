//! Token bucket limiting requests to one LINSTOR controller

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Token bucket refilled at `qps` tokens per second, holding at most `burst`
#[derive(Debug)]
pub struct RateLimiter {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

impl RateLimiter {
    /// A `qps` of zero or less disables limiting
    pub fn new(qps: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            qps,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }

    pub fn is_limited(&self) -> bool {
        self.qps > 0.0
    }

    /// Take a token, returning how long the caller has to wait for it
    fn reserve(&self) -> Duration {
        if !self.is_limited() {
            return Duration::ZERO;
        }
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.qps).min(self.burst);
        bucket.last = now;
        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / self.qps)
        }
    }

    /// Wait until a request may be sent
    pub async fn acquire(&self) {
        let wait = self.reserve();
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_wait() {
        let limiter = RateLimiter::new(10.0, 1);
        assert_eq!(limiter.reserve(), Duration::ZERO);

        let wait = limiter.reserve();
        assert!(wait > Duration::from_millis(50), "{:?}", wait);
        assert!(wait <= Duration::from_millis(100), "{:?}", wait);

        // Reservations queue up behind each other
        assert!(limiter.reserve() > wait);
    }

    #[test]
    fn test_unlimited() {
        let limiter = RateLimiter::new(0.0, 1);
        assert!(!limiter.is_limited());
        for _ in 0..100 {
            assert_eq!(limiter.reserve(), Duration::ZERO);
        }
        tokio_test::block_on(limiter.acquire());
    }

    #[tokio::test]
    async fn test_acquire_waits() {
        let limiter = RateLimiter::new(50.0, 2);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(15));
    }
}
