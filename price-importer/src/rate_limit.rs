//! Request gate enforcing a minimum spacing between upstream requests.
//!
//! The public CoinGecko tier bans clients that burst, so every request goes
//! through one shared gate. The quota replenishes one cell per interval with
//! a burst of one, which spaces dispatches by at least the interval.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::time::Duration;
use tracing::debug;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Cooperative gate spacing request dispatch by a fixed interval.
pub struct RequestGate {
    /// `None` when the interval is zero and requests are never held back
    limiter: Option<Limiter>,
}

impl RequestGate {
    /// Create a new gate. The first acquisition never waits.
    pub fn new(interval: Duration) -> Self {
        let limiter = Quota::with_period(interval).map(RateLimiter::direct);
        Self { limiter }
    }

    /// Wait until a request may be dispatched.
    pub async fn acquire(&self) {
        if let Some(ref limiter) = self.limiter {
            if limiter.check().is_err() {
                debug!("Request gate waiting");
                limiter.until_ready().await;
            }
        }
    }
}
