//! Request spacing for embedding calls.
//!
//! [`RateLimiter`] hands out time slots `1 / requests_per_second` apart.
//! Callers reserve a slot under a short lock and sleep outside it.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub struct RateLimiter {
    interval: Duration,
    requests_per_second: f64,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// A limiter allowing `requests_per_second` calls per second.
    ///
    /// Non-positive or non-finite rates disable spacing.
    pub fn new(requests_per_second: f64) -> Self {
        let interval = if requests_per_second.is_finite() && requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };
        Self {
            interval,
            requests_per_second,
            next_slot: Mutex::new(None),
        }
    }

    pub fn requests_per_second(&self) -> f64 {
        self.requests_per_second
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the next call is allowed.
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.interval);
            slot
        };
        let now = Instant::now();
        if slot > now {
            debug!(wait_ms = (slot - now).as_millis() as u64, "rate limiter wait");
            tokio::time::sleep_until(slot).await;
        }
    }
}
