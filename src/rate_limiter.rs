//! Token bucket limiting how fast paced mutations reach Gmail
//!
//! Gmail enforces an undocumented per-minute ceiling on filter and label
//! writes. The bucket holds `burst` tokens, refills at
//! `mutations_per_minute / 60` tokens per second, and each real mutation
//! takes one token, waiting when the bucket is empty.
//!
//! Time is read from `tokio::time`, so paused-clock tests see refills advance
//! with the virtual clock.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct QuotaRateLimiter {
    inner: Arc<Mutex<BucketState>>,
}

#[derive(Debug)]
struct BucketState {
    available: f64,
    capacity: f64,
    /// Tokens added per second
    refill_rate: f64,
    last_refill: Instant,
    granted: u64,
    waited: Duration,
}

impl BucketState {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.available = (self.available + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Snapshot of bucket usage
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaStats {
    pub available: f64,
    pub capacity: f64,
    pub granted: u64,
    pub waited: Duration,
}

impl QuotaRateLimiter {
    /// Bucket allowing `mutations_per_minute` sustained with bursts of `burst`
    pub fn per_minute(mutations_per_minute: u32, burst: u32) -> Self {
        Self::with_config(
            f64::from(mutations_per_minute.max(1)) / 60.0,
            f64::from(burst.max(1)),
        )
    }

    /// Bucket with an explicit refill rate (tokens per second) and capacity.
    /// Starts full.
    pub fn with_config(refill_rate: f64, capacity: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BucketState {
                available: capacity,
                capacity,
                refill_rate,
                last_refill: Instant::now(),
                granted: 0,
                waited: Duration::ZERO,
            })),
        }
    }

    /// Take one token, sleeping until one is available
    pub async fn acquire(&self) {
        let mut slept = Duration::ZERO;
        loop {
            let wait = {
                let mut state = self.inner.lock().await;
                state.refill();
                trace!(
                    "Mutation budget: {:.2}/{:.0} tokens available",
                    state.available,
                    state.capacity
                );

                if state.available >= 1.0 {
                    state.available -= 1.0;
                    state.granted += 1;
                    state.waited += slept;
                    return;
                }

                Duration::from_secs_f64((1.0 - state.available) / state.refill_rate)
            };

            debug!("Mutation budget exhausted, waiting {:.2}s", wait.as_secs_f64());
            tokio::time::sleep(wait).await;
            slept += wait;
        }
    }

    pub async fn stats(&self) -> QuotaStats {
        let mut state = self.inner.lock().await;
        state.refill();
        QuotaStats {
            available: state.available,
            capacity: state.capacity,
            granted: state.granted,
            waited: state.waited,
        }
    }
}
