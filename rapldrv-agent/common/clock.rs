use nix::time::{clock_gettime, ClockId};

use crate::error::Result;

/// Source of the 64-bit tick count returned for the timestamp sentinel
pub trait TickSource: Send + Sync {
    fn now_ticks(&self) -> Result<u64>;
}

/// `CLOCK_MONOTONIC` in nanoseconds
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl TickSource for MonotonicClock {
    fn now_ticks(&self) -> Result<u64> {
        let ts = clock_gettime(ClockId::CLOCK_MONOTONIC)?;
        // Both fields are non-negative for the monotonic clock
        Ok((ts.tv_sec() as u64) * 1_000_000_000 + ts.tv_nsec() as u64)
    }
}
