//! Token-bucket rate limiting for DELETE endpoints.

use engram_core::error::{Error, Result};
use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;

use crate::problem::ApiError;

pub type DeleteRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Build the shared token bucket: `burst` tokens, one refilled every
/// `refill_ms` milliseconds.
pub fn build_delete_limiter(burst: u32, refill_ms: u64) -> Result<DeleteRateLimiter> {
    let burst = NonZeroU32::new(burst)
        .ok_or_else(|| Error::config("delete_rate_burst must be positive"))?;
    let quota = Quota::with_period(Duration::from_millis(refill_ms.max(1)))
        .ok_or_else(|| Error::config("delete_rate_refill_ms must be positive"))?
        .allow_burst(burst);
    Ok(RateLimiter::direct(quota))
}

/// Take one token or produce the 429 response.
pub fn check_delete_rate(limiter: &DeleteRateLimiter, instance: &str) -> std::result::Result<(), ApiError> {
    match limiter.check() {
        Ok(()) => Ok(()),
        Err(not_until) => {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            Err(ApiError::rate_limited(wait.as_secs().max(1), instance))
        }
    }
}
