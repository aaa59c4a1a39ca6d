//! Per-source-address rate limiting with continuously refilling token
//! buckets. The bucket map is process-wide and guarded by a single mutex;
//! stale buckets are evicted time-based when the map grows.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Buckets at full capacity and untouched for this long are evicted.
const EVICTION_IDLE: Duration = Duration::from_secs(600);
/// Eviction only runs once the map holds this many entries.
const EVICTION_THRESHOLD: usize = 1024;

pub struct RateLimiter {
    /// Tokens refilled per second. The burst size equals the configured
    /// requests per minute.
    rate: f64,
    burst: f64,
    buckets: Mutex<HashMap<IpAddr, Bucket>>,
}

struct Bucket {
    tokens: f64,
    updated: Instant,
}

impl RateLimiter {
    pub fn new(rpm: u32) -> Self {
        Self {
            rate: f64::from(rpm) / 60.0,
            burst: f64::from(rpm),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Takes one token from the address' bucket. Returns how long the caller
    /// should wait before retrying when the bucket is empty.
    pub fn check(&self, addr: IpAddr) -> Result<(), Duration> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("rate limiter lock poisoned");
        if buckets.len() >= EVICTION_THRESHOLD {
            buckets.retain(|_, bucket| {
                bucket.tokens < self.burst || now.duration_since(bucket.updated) < EVICTION_IDLE
            });
        }

        let bucket = buckets.entry(addr).or_insert(Bucket {
            tokens: self.burst,
            updated: now,
        });
        let elapsed = now.duration_since(bucket.updated).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.updated = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(missing / self.rate).max(Duration::from_secs(1)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, last])
    }

    #[test]
    fn burst_then_reject() {
        let limiter = RateLimiter::new(3);
        for _ in 0..3 {
            assert!(limiter.check(addr(1)).is_ok());
        }
        let retry_after = limiter.check(addr(1)).unwrap_err();
        assert!(retry_after >= Duration::from_secs(1));
    }

    #[test]
    fn buckets_are_per_address() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.check(addr(1)).is_ok());
        assert!(limiter.check(addr(1)).is_err());
        assert!(limiter.check(addr(2)).is_ok());
    }
}
