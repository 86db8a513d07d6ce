// Request pacing for remote embedding endpoints.
//
// Hosted embedding APIs throttle per key. Each caller reserves the next free
// send slot under the lock and sleeps outside it, so concurrent callers are
// spaced `interval` apart instead of all waking at once.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

/// Enforces a maximum request rate across clones.
#[derive(Clone)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    /// Create a new rate limiter that allows `requests_per_second` requests per second.
    pub fn new(requests_per_second: f64) -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / requests_per_second),
            next_slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Wait until a request is allowed, then return.
    pub async fn acquire(&self) {
        let wake_at = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.interval);
            slot
        };

        tokio::time::sleep_until(wake_at).await;
    }
}
