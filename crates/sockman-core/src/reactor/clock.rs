//! Wall-clock seam used for last-activity timestamps and keepalive timeouts.

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current time in whole seconds.
#[cfg_attr(test, mockall::automock)]
pub trait Clock {
    fn now_secs(&self) -> u64;
}

/// [`Clock`] backed by [`SystemTime`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}
