//! Shared monotonic timebase for frame timestamps
//!
//! Both capture workers stamp frames from clones of one `PTSClock`, so the
//! synchronizer can compare timestamps across cameras directly.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic clock for capture timestamps
#[derive(Debug, Clone)]
pub struct PTSClock {
    start: Arc<Instant>,
}

impl PTSClock {
    /// Create a new clock with the current instant as time zero
    pub fn new() -> Self {
        Self {
            start: Arc::new(Instant::now()),
        }
    }

    /// Microseconds since clock creation
    #[inline]
    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    /// Time since clock creation
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for PTSClock {
    fn default() -> Self {
        Self::new()
    }
}
