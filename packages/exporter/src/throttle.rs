//! Client-side request throttle.
//!
//! A single-cell `governor` bucket refilled once per period, so consecutive
//! requests are spaced by at least that period no matter how many tasks
//! share the throttle.

use governor::{Quota, RateLimiter};
use std::sync::Arc;
use std::time::Duration;

type DefaultRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Clone)]
pub struct Throttle {
    limiter: Option<Arc<DefaultRateLimiter>>,
}

impl Throttle {
    /// One request per `period`. A zero period disables throttling.
    pub fn every(period: Duration) -> Self {
        let limiter = Quota::with_period(period).map(|quota| Arc::new(RateLimiter::direct(quota)));
        Self { limiter }
    }

    pub fn is_limited(&self) -> bool {
        self.limiter.is_some()
    }

    /// Wait until the next request may go out.
    pub async fn ready(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}
