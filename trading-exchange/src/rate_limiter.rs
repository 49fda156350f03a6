//! Single minimum-gap rate limiter.
//!
//! Grounded on the shape of `risk/rate_limiter.rs`'s `RateLimiter`
//! (`parking_lot::Mutex` guarding the refill clock, a plain `allow()`
//! check), but not its token-bucket algorithm: the original bot's
//! `BinanceClient._rate_limit` (`original_source/core/binance.py`) just
//! waits out a fixed minimum interval between requests rather than
//! metering a bucket, and that is the behavior this adapter reproduces
//! (SUPPLEMENT decision, see SPEC_FULL.md §3).

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Enforces a minimum gap between successive requests by sleeping out
/// whatever remains of the interval when a caller arrives early.
pub struct IntervalLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl IntervalLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// Blocks the caller until `min_interval` has elapsed since the last
    /// call returned. Never blocks on the first call.
    pub async fn wait(&self) {
        let sleep_for = {
            let mut last = self.last_request.lock();
            let now = Instant::now();
            let sleep_for = match *last {
                Some(prev) => {
                    let elapsed = now.duration_since(prev);
                    self.min_interval.saturating_sub(elapsed)
                }
                None => Duration::ZERO,
            };
            *last = Some(now + sleep_for);
            sleep_for
        };
        if !sleep_for.is_zero() {
            tokio::time::sleep(sleep_for).await;
        }
    }
}
