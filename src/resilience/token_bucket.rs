//! Token bucket with an injected monotonic clock.
//!
//! The caller supplies `now` on every call so the bucket itself holds no
//! clock. Refill only ever moves forward: a `now` earlier than the last refill
//! adds nothing and does not rewind the bucket.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Maximum tokens (burst capacity)
    capacity: f64,
    /// Tokens added per second
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A bucket that starts full
    pub fn new(refill_rate: f64, burst_capacity: u32, now: Instant) -> Self {
        let capacity = f64::from(burst_capacity);
        Self {
            capacity,
            refill_rate,
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Take one token, or report how long until one is available
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(self.wait_for_one())
        }
    }

    pub fn available_tokens(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    pub fn time_until_available(&mut self, now: Instant) -> Duration {
        self.refill(now);
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            self.wait_for_one()
        }
    }

    fn wait_for_one(&self) -> Duration {
        let nanos = ((1.0 - self.tokens) / self.refill_rate * 1e9).ceil();
        if nanos.is_finite() && nanos < u64::MAX as f64 {
            Duration::from_nanos(nanos as u64)
        } else {
            Duration::MAX
        }
    }

    fn refill(&mut self, now: Instant) {
        if now <= self.last_refill {
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_refill);
        let new_tokens = elapsed.as_secs_f64() * self.refill_rate;

        self.tokens = (self.tokens + new_tokens).min(self.capacity);
        self.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_starts_full_and_drains() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(1.0, 3, start);

        assert!(bucket.try_acquire(start).is_ok());
        assert!(bucket.try_acquire(start).is_ok());
        assert!(bucket.try_acquire(start).is_ok());

        let wait = bucket.try_acquire(start).unwrap_err();
        assert_eq!(wait, Duration::from_secs(1));
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(10.0, 2, start);
        bucket.try_acquire(start).unwrap();
        bucket.try_acquire(start).unwrap();

        let later = start + Duration::from_secs(60);
        assert_eq!(bucket.available_tokens(later), 2.0);
    }

    #[test]
    fn test_clock_going_backwards_adds_nothing() {
        let start = Instant::now() + Duration::from_secs(10);
        let mut bucket = TokenBucket::new(1.0, 1, start);
        bucket.try_acquire(start).unwrap();

        let earlier = start - Duration::from_secs(5);
        assert!(bucket.try_acquire(earlier).is_err());

        // Refill still measures from the later instant
        let wait = bucket.time_until_available(start + Duration::from_millis(500));
        assert_eq!(wait, Duration::from_millis(500));
    }

    #[test]
    fn test_waiting_the_reported_duration_is_enough() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(3.0, 1, start);
        bucket.try_acquire(start).unwrap();

        let wait = bucket.try_acquire(start).unwrap_err();
        assert!(bucket.try_acquire(start + wait).is_ok());
    }

    proptest! {
        /// Grants in every window of length T stay within rate * T + burst.
        #[test]
        fn prop_sliding_window_bound(
            rate in 0.5f64..20.0,
            burst in 1u32..8,
            gaps_ms in proptest::collection::vec(0u64..400, 1..200),
        ) {
            let start = Instant::now();
            let mut bucket = TokenBucket::new(rate, burst, start);
            let mut now = start;
            let mut grants = Vec::new();

            for gap in gaps_ms {
                now += Duration::from_millis(gap);
                if bucket.try_acquire(now).is_ok() {
                    grants.push(now);
                }
            }

            for (i, window_start) in grants.iter().enumerate() {
                for (j, window_end) in grants.iter().enumerate().skip(i) {
                    let span = window_end.duration_since(*window_start).as_secs_f64();
                    let count = (j - i + 1) as f64;
                    prop_assert!(
                        count <= rate * span + f64::from(burst) + 1e-6,
                        "{} grants in {}s exceeds bound", count, span
                    );
                }
            }
        }
    }
}
