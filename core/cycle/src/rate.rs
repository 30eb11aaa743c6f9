//! Per-group pacing of gateway calls. A refill-on-demand token bucket;
//! `acquire` blocks the calling (blocking-pool) thread until a token is
//! available, which is how the debit loop spreads its calls.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    rate_per_sec: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(rate_per_sec: u32) -> RateLimiter {
        let rate = rate_per_sec.max(1) as f64;
        RateLimiter {
            buckets: Mutex::new(HashMap::new()),
            rate_per_sec: rate,
            burst: rate,
        }
    }

    /// Takes one token for `key`, sleeping until the bucket refills if
    /// necessary. Must only be called from a blocking context.
    pub fn acquire(&self, key: &str) {
        loop {
            match self.try_take(key) {
                Ok(()) => return,
                Err(wait) => std::thread::sleep(wait),
            }
        }
    }

    fn try_take(&self, key: &str) -> Result<(), Duration> {
        let mut buckets = self.buckets.lock();
        let now = Instant::now();
        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            tokens: self.burst,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(deficit / self.rate_per_sec))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_immediate() {
        let limiter = RateLimiter::new(10);
        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire("g1");
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn beyond_burst_waits() {
        let limiter = RateLimiter::new(10);
        for _ in 0..10 {
            limiter.acquire("g1");
        }
        let start = Instant::now();
        limiter.acquire("g1");
        // Roughly one token period (100ms at 10/s).
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn groups_do_not_share_buckets() {
        let limiter = RateLimiter::new(1);
        limiter.acquire("g1");
        let start = Instant::now();
        limiter.acquire("g2");
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
