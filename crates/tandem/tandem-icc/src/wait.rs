//! How a reader waits out a write in progress, and how it can be told to stop.

use crate::error::ShmError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Poll interval the reader falls back to while a write is in flight.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What the reader does between two polls of an odd sequence counter.
///
/// None of these block in the OS sense: the reader stays schedulable and
/// checks its [`CancelToken`] between polls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Busy-spin with a CPU relax hint. Lowest latency, burns a core.
    Spin,
    /// Give the rest of the time slice back to the scheduler.
    Yield,
    /// Sleep for a fixed, short interval.
    Sleep(Duration),
}

impl Default for WaitStrategy {
    fn default() -> Self {
        WaitStrategy::Sleep(DEFAULT_POLL_INTERVAL)
    }
}

impl WaitStrategy {
    /// Maps a configured poll interval onto a strategy; zero means spin.
    pub fn from_poll_interval(interval: Duration) -> Self {
        if interval.is_zero() {
            WaitStrategy::Spin
        } else {
            WaitStrategy::Sleep(interval)
        }
    }

    #[inline]
    pub(crate) fn pause(&self) {
        match *self {
            WaitStrategy::Spin => std::hint::spin_loop(),
            WaitStrategy::Yield => std::thread::yield_now(),
            WaitStrategy::Sleep(d) => std::thread::sleep(d),
        }
    }
}

/// Shared flag that interrupts a reader stuck waiting on a busy writer.
///
/// Clones observe the same flag. Cancelling is sticky; build a new token to
/// read again.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn check(&self) -> Result<(), ShmError> {
        if self.is_cancelled() {
            Err(ShmError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_means_spin() {
        assert_eq!(WaitStrategy::from_poll_interval(Duration::ZERO), WaitStrategy::Spin);
        assert_eq!(
            WaitStrategy::from_poll_interval(Duration::from_micros(250)),
            WaitStrategy::Sleep(Duration::from_micros(250))
        );
        assert_eq!(WaitStrategy::default(), WaitStrategy::Sleep(DEFAULT_POLL_INTERVAL));
    }

    #[test]
    fn cancel_is_seen_by_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(other.check().is_ok());
        token.cancel();
        assert!(other.is_cancelled());
        assert!(matches!(other.check(), Err(ShmError::Cancelled)));
    }
}
