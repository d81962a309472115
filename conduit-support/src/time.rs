//! Small time helpers, grounded on `flux::time`.

use std::time::{Duration, Instant};

/// Milliseconds elapsed since `since`, saturating at `u64::MAX`.
#[inline]
pub fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

#[inline]
pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}
